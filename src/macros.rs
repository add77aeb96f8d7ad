/// Getters and change-reporting setters for a flat settings record.
///
/// Each setter returns `$dirty` when the value changed and `Dirty::NONE`
/// otherwise.
macro_rules! settings_accessors {
    ($ty:ident, $dirty:expr, { $($field:ident / $setter:ident : $t:ty),* $(,)* }) => {
        impl $ty {
            $(
                pub fn $field(&self) -> $t {
                    self.$field
                }

                pub fn $setter(&mut self, value: $t) -> $crate::settings::Dirty {
                    if self.$field == value {
                        $crate::settings::Dirty::NONE
                    } else {
                        self.$field = value;
                        $dirty
                    }
                }
            )*
        }
    };
}
