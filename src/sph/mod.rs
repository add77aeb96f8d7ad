//! Smoothed Particle hydrodynamics
//!
//! References:
//!     [MDM03] Matthias Müller, David Charypar, and Markus Gross, 2003,
//!             Particle-based fluid simulation for interactive applications,
//!             In Proceedings of the 2003 ACM SIGGRAPH/Eurographics symposium on Computer animation (SCA '03),
//!             154-159
//!     [ICS+14] Markus Ihmsen, Jens Cornelis, Barbara Solenthaler, Christopher Horvath, Matthias Teschner, 2014,
//!             Implicit Incompressible SPH,
//!             IEEE Transactions on Visualization and Computer Graphics 20(3), 426-435
//!     [BGT17] Stefan Band, Christoph Gissler, Matthias Teschner, 2017,
//!             Compressed Neighbour Lists for SPH,
//!             Computer Graphics Forum 39(1), 531-542

pub mod compressed;
pub mod grid;
pub mod iisph;
pub mod kernel;
pub mod neighbor;
pub mod sesph;
pub mod solver;
pub mod sort;

use crate::math::Dimension;
use crate::particle::{ParticleStore, Property};
use crate::report::CompatibilityReport;

use self::property::*;

pub mod property {
    //! Common particle properties
    use crate::math::{Dimension, Real, VectorN};
    use crate::particle::Property;

    macro_rules! vector_property {
        ($(#[$attr:meta])* $name:ident) => {
            $(#[$attr])*
            #[derive(Copy, Clone, Debug)]
            pub struct $name<N: Dimension>(pub VectorN<N>);

            impl<N: Dimension> Property for $name<N> {
                type Subtype = VectorN<N>;
                fn new() -> Self::Subtype {
                    VectorN::default()
                }
            }
        };
    }

    macro_rules! scalar_property {
        ($(#[$attr:meta])* $name:ident) => {
            $(#[$attr])*
            #[derive(Copy, Clone, Debug)]
            pub struct $name(pub Real);

            impl Property for $name {
                type Subtype = Real;
                fn new() -> Self::Subtype {
                    0.0
                }
            }
        };
    }

    #[derive(Copy, Clone, Debug)]
    pub struct Position<N: Dimension>(pub VectorN<N>);

    impl<N: Dimension> Property for Position<N> {
        type Subtype = VectorN<N>;
        fn new() -> Self::Subtype {
            VectorN::default()
        }
        const SPATIAL: bool = true;
    }

    vector_property!(Velocity);
    vector_property!(Acceleration);
    vector_property!(
        /// Gravity and viscosity, without pressure.
        NonPressureAcceleration
    );
    vector_property!(
        /// Velocity after applying the non-pressure acceleration (IISPH).
        PredictedVelocity
    );

    scalar_property!(Mass);
    scalar_property!(Density);
    scalar_property!(Pressure);
    scalar_property!(
        /// Right hand side of the pressure relaxation (IISPH).
        SourceTerm
    );
    scalar_property!(
        /// Diagonal of the pressure relaxation (IISPH).
        DiagonalElement
    );

    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub enum ParticleKind {
        Normal,
        /// Static, takes part in density and pressure of its neighbors only.
        Boundary,
        /// Logically removed. Ignored by searches and solvers.
        Inactive,
    }

    impl Default for ParticleKind {
        fn default() -> Self {
            ParticleKind::Normal
        }
    }

    #[derive(Copy, Clone, Debug)]
    pub struct Kind(pub ParticleKind);

    impl Property for Kind {
        type Subtype = ParticleKind;
        fn new() -> Self::Subtype {
            ParticleKind::Normal
        }
        const SPATIAL: bool = true;
    }

    /// Opaque user tag.
    #[derive(Copy, Clone, Debug)]
    pub struct Tag(pub u32);

    impl Property for Tag {
        type Subtype = u32;
        fn new() -> Self::Subtype {
            0
        }
    }
}

/// Add the columns every solver and search works on.
pub fn init<N: Dimension>(particles: &mut ParticleStore) {
    particles.add_property::<Position<N>>();
    particles.add_property::<Velocity<N>>();
    particles.add_property::<Acceleration<N>>();
    particles.add_property::<Mass>();
    particles.add_property::<Density>();
    particles.add_property::<Pressure>();
    particles.add_property::<Kind>();
    particles.add_property::<Tag>();
}

/// Physically drop inactive particles. Only valid between steps.
pub fn remove_inactive(particles: &mut ParticleStore) {
    if !particles.is_attribute_present::<Kind>() {
        return;
    }
    let before = particles.size();
    particles.retain(|p, i| p.read::<Kind>()[i] != ParticleKind::Inactive);
    log::debug!("removed {} inactive particles", before - particles.size());
}

/// Report a missing column under its short type name.
pub(crate) fn require<P: Property>(particles: &ParticleStore, report: &mut CompatibilityReport) {
    if !particles.is_attribute_present::<P>() {
        report.add_issue(format!(
            "Particles are missing the {} attribute.",
            short_type_name::<P>()
        ));
    }
}

fn short_type_name<P>() -> &'static str {
    let name = std::any::type_name::<P>();
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base)
}
