//! Headless dam break.
//!
//! Usage: `fluid_console [sesph|sesph3d|iisph|iisph3d] [steps] [block size]`
//!
//! Set `RUST_LOG=debug` for per-step solver diagnostics.

use anyhow::{bail, Context, Result};
use typenum::{U2, U3};

use hydrosph::math::{Dimension, Real, VectorN};
use hydrosph::sph::iisph::IisphSettings;
use hydrosph::sph::property::{Density, Kind, Mass, ParticleKind, Position};
use hydrosph::sph::sesph::SesphSettings;
use hydrosph::timestep::DynamicCflSettings;
use hydrosph::{
    CompatibilityReport, Dirty, FluidSolver, ParallelExecutor, ParticleStore, SearchKind, SimulationParameters, Simulator,
    SolverKind, TimestepGenerator,
};

const BOUNDARY_LAYERS: i32 = 3;

struct Options {
    kind: SolverKind,
    steps: usize,
    size: usize,
}

fn parse_options() -> Result<Options> {
    let mut args = std::env::args().skip(1);
    let kind = match args.next().as_deref() {
        None | Some("sesph") => SolverKind::Sesph(SesphSettings::default()),
        Some("sesph3d") => SolverKind::Sesph3d(SesphSettings::default()),
        Some("iisph") => SolverKind::Iisph(IisphSettings::default()),
        Some("iisph3d") => SolverKind::Iisph3d(IisphSettings::default()),
        Some(other) => bail!("unknown solver `{}`", other),
    };
    let steps = match args.next() {
        Some(steps) => steps.parse().with_context(|| format!("invalid step count `{}`", steps))?,
        None => 200,
    };
    let size = match args.next() {
        Some(size) => size.parse().with_context(|| format!("invalid block size `{}`", size))?,
        None => 20,
    };
    if size == 0 {
        bail!("block size must be positive");
    }
    Ok(Options { kind, steps, size })
}

/// Fluid block resting on a boundary floor twice as wide.
fn dam_break<N: Dimension>(size: usize, particle_size: Real, rest_density: Real) -> ParticleStore {
    let size = size as i32;
    let mut positions = Vec::new();
    let mut kinds = Vec::new();

    let extent = |d: usize| if d == 1 { size + BOUNDARY_LAYERS } else { 2 * size };
    let cells: i32 = (0..N::DIM).map(extent).product();
    for mut index in 0..cells {
        let mut coords = [0i32; 3];
        for (d, c) in coords.iter_mut().enumerate().take(N::DIM) {
            *c = index % extent(d);
            index /= extent(d);
        }
        let floor = coords[1] < BOUNDARY_LAYERS;
        let in_block = (0..N::DIM).all(|d| d == 1 || coords[d] < size);
        if !floor && !in_block {
            continue;
        }

        let mut position = VectorN::<N>::default();
        for d in 0..N::DIM {
            let offset = if d == 1 { BOUNDARY_LAYERS } else { 0 };
            position[d] = (coords[d] - offset) as Real * particle_size;
        }
        positions.push(position);
        kinds.push(if floor { ParticleKind::Boundary } else { ParticleKind::Normal });
    }

    let mass = rest_density * particle_size.powi(N::DIM as i32);
    let mut particles = ParticleStore::new();
    hydrosph::sph::init::<N>(&mut particles);
    particles
        .add_particles(positions.len())
        .with::<Position<N>>(&positions)
        .with::<Kind>(&kinds)
        .with::<Mass>(&vec![mass; positions.len()]);
    particles
}

fn average_density(particles: &ParticleStore) -> Real {
    let density = particles.read::<Density>();
    let kind = particles.read::<Kind>();
    let (sum, count) = density
        .iter()
        .zip(kind.iter())
        .filter(|&(_, &kind)| kind == ParticleKind::Normal)
        .fold((0.0, 0), |(sum, count), (&density, _)| (sum + density, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as Real
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let options = parse_options()?;

    let parameters = SimulationParameters::new(1.0, 1.0, 9.81);
    let solver = FluidSolver::new(options.kind, parameters, SearchKind::Compressed, ParallelExecutor::Rayon);
    let particles = match solver.dimensions() {
        3 => dam_break::<U3>(options.size, parameters.particle_size(), parameters.rest_density()),
        _ => dam_break::<U2>(options.size, parameters.particle_size(), parameters.rest_density()),
    };
    log::info!("{}: {} particles", solver.name(), particles.size());

    let mut simulator = Simulator::new(
        particles,
        parameters,
        solver,
        TimestepGenerator::DynamicCfl(DynamicCflSettings::default()),
    );
    simulator.set_sorting(true);
    simulator.initialize(Dirty::ALL);

    let mut report = CompatibilityReport::new();
    simulator.create_compatibility_report(&mut report);
    report.log_issues();
    report.into_result().context("simulation is not configured correctly")?;

    for _ in 0..options.steps {
        simulator.execute_simulation_step();
        let timepoint = simulator.timepoint();
        let iterations = simulator
            .solver()
            .last_iteration_count()
            .map(|count| format!(", {} iterations", count))
            .unwrap_or_default();
        log::info!(
            "step {} t = {:.4} dt = {:.5}{}, average density {:.4}",
            timepoint.timestep_number,
            timepoint.simulation_time,
            timepoint.actual_time_step,
            iterations,
            average_density(simulator.particles())
        );
    }
    Ok(())
}
