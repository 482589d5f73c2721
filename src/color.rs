//! Color-conversion data and the state machine keeping the GPU and display
//! paths consistent.
//!
//! A color conversion is applied either by display hardware (direct scanout)
//! or by the renderer's shader (GPU fallback), never both. The state machine
//! tracks what the client requested and what the display hardware currently
//! has installed, and answers two questions per frame: does this frame need
//! to (re)apply the conversion, and must the display's conversion be cleared
//! before the GPU takes over.

/// A 3x3 color matrix with pre- and post-offsets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorConversion {
    /// Row-major 3x3 coefficients.
    pub coefficients: [f32; 9],
    /// Offsets added before the matrix multiply.
    pub preoffsets: [f32; 3],
    /// Offsets added after the matrix multiply.
    pub postoffsets: [f32; 3],
}

impl ColorConversion {
    /// The conversion that leaves colors untouched.
    pub const IDENTITY: Self = Self {
        coefficients: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        preoffsets: [0.0, 0.0, 0.0],
        postoffsets: [0.0, 0.0, 0.0],
    };

    /// Whether this conversion is the identity.
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for ColorConversion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Tracks client-requested color conversion against what the display
/// hardware currently has installed.
///
/// The reachable states are: *Idle* (identity requested, display clean),
/// *Dirty* ([`data_to_apply`] is `Some`), *AppliedDirect* (display hardware
/// carries the requested conversion), and *AppliedGPU* (display clean while a
/// non-identity conversion is handled by the renderer's shader — which keeps
/// [`data_to_apply`] `Some` so a return to direct scanout re-installs it).
///
/// [`data_to_apply`]: ColorConversionStateMachine::data_to_apply
#[derive(Debug, Default)]
pub struct ColorConversionStateMachine {
    /// What the client last requested.
    data: ColorConversion,
    /// The non-identity conversion currently installed on display hardware,
    /// if any.
    display_cc: Option<ColorConversion>,
}

impl ColorConversionStateMachine {
    /// Creates the machine in the Idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new client-requested conversion.
    pub fn set_data(&mut self, data: ColorConversion) {
        self.data = data;
    }

    /// The conversion the current frame must program, or `None` when neither
    /// path needs to touch color state.
    pub fn data_to_apply(&self) -> Option<ColorConversion> {
        match &self.display_cc {
            Some(installed) if *installed == self.data => None,
            Some(_) => Some(self.data),
            None if self.data.is_identity() => None,
            None => Some(self.data),
        }
    }

    /// A direct-scanout config containing this machine's data was applied.
    pub fn apply_config_succeeded(&mut self) {
        self.display_cc = if self.data.is_identity() { None } else { Some(self.data) };
    }

    /// Whether the GPU path must first neutralize the display's conversion.
    ///
    /// True exactly when a previous direct frame left a non-identity
    /// conversion on the hardware; the GPU shader applies the conversion
    /// itself, so scanning its output through hardware CC would double-apply.
    pub fn gpu_requires_display_clearing(&self) -> bool {
        self.display_cc.is_some()
    }

    /// The display's conversion was reset to identity.
    pub fn display_cleared(&mut self) {
        self.display_cc = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn non_identity() -> ColorConversion {
        ColorConversion {
            coefficients: [0.5, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.5],
            preoffsets: [0.1, 0.1, 0.1],
            postoffsets: [0.0, 0.0, 0.0],
        }
    }

    #[test]
    fn test_idle_machine_has_nothing_to_apply() {
        let machine = ColorConversionStateMachine::new();
        assert_eq!(machine.data_to_apply(), None);
        assert!(!machine.gpu_requires_display_clearing());
    }

    #[test]
    fn test_set_data_makes_machine_dirty() {
        let mut machine = ColorConversionStateMachine::new();
        machine.set_data(non_identity());
        assert_eq!(machine.data_to_apply(), Some(non_identity()));
    }

    #[test]
    fn test_direct_apply_consumes_dirty_state() {
        let mut machine = ColorConversionStateMachine::new();
        machine.set_data(non_identity());
        machine.apply_config_succeeded();
        // Display carries the conversion; nothing to re-apply, but the GPU
        // path would have to clear it.
        assert_eq!(machine.data_to_apply(), None);
        assert!(machine.gpu_requires_display_clearing());
    }

    #[test]
    fn test_gpu_clearing_reactivates_data() {
        let mut machine = ColorConversionStateMachine::new();
        machine.set_data(non_identity());
        machine.apply_config_succeeded();

        // GPU fallback frame: display must be cleared, then the shader owns
        // the conversion for as long as frames stay on the GPU path.
        assert!(machine.gpu_requires_display_clearing());
        machine.display_cleared();
        assert!(!machine.gpu_requires_display_clearing());
        assert_eq!(machine.data_to_apply(), Some(non_identity()));
        assert_eq!(machine.data_to_apply(), Some(non_identity()));

        // Back on the direct path, the conversion is re-installed.
        machine.apply_config_succeeded();
        assert_eq!(machine.data_to_apply(), None);
        assert!(machine.gpu_requires_display_clearing());
    }

    #[test]
    fn test_identity_request_clears_installed_conversion() {
        let mut machine = ColorConversionStateMachine::new();
        machine.set_data(non_identity());
        machine.apply_config_succeeded();

        machine.set_data(ColorConversion::IDENTITY);
        // The display still carries the old matrix, so identity must be
        // programmed once.
        assert_eq!(machine.data_to_apply(), Some(ColorConversion::IDENTITY));
        machine.apply_config_succeeded();
        assert_eq!(machine.data_to_apply(), None);
        assert!(!machine.gpu_requires_display_clearing());
    }

    #[test]
    fn test_identity_is_identity() {
        assert!(ColorConversion::IDENTITY.is_identity());
        assert!(ColorConversion::default().is_identity());
        assert!(!non_identity().is_identity());
    }
}
