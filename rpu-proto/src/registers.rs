//! Parameter register map shared with the RPU feedback firmware.
//!
//! # Register Map
//!
//! | idx | written by | low 32 bits                 | high 32 bits               |
//! |-----|------------|-----------------------------|----------------------------|
//! |  0  | RPU        | processed iterations (u32)  | RPU cycle counter (u32)    |
//! |  1  | RPU        | amplitude² (error signal)   | Z bias (control signal)    |
//! |  2  | host       | lock-in amplitude scale     | reserved, 0.0              |
//! |  3  | host       | feedback set point          | proportional gain          |
//! |  4  | host       | integral gain               | derivative gain            |
//! |  5  | host       | scanner X bias              | scanner Y bias             |
//! |  6  | host       | Z bias low limit            | Z bias high limit          |
//!
//! Each index has exactly one encoding. Instead of interpreting a raw value
//! "as floats" or "as integers" at the call site, every register has a typed
//! value implementing [`Register`], which knows its own index and encoding.

use std::fmt;
use std::str::FromStr;

use strum::{Display, EnumIter};

use crate::codec::{decode_float_pair, decode_uint_pair, encode_float_pair, encode_uint_pair};
use crate::error::{ProtoError, ProtoResult};

/// Number of 64-bit cells in the RPU parameter area.
pub const PARAM_REGISTER_COUNT: usize = 20;

/// How the two halves of a register are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Encoding {
    #[strum(to_string = "f32 pair")]
    FloatPair,
    #[strum(to_string = "u32 pair")]
    UintPair,
}

/// Which side of the link owns the content of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Writer {
    #[strum(to_string = "host")]
    Host,
    #[strum(to_string = "rpu")]
    Rpu,
}

/// Addressable parameter registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, Display)]
#[repr(u8)]
pub enum RegisterIndex {
    #[strum(to_string = "iteration-status")]
    IterationStatus = 0,
    #[strum(to_string = "error-control")]
    ErrorControl = 1,
    #[strum(to_string = "scale")]
    Scale = 2,
    #[strum(to_string = "setpoint-proportional")]
    SetpointProportional = 3,
    #[strum(to_string = "integral-derivative")]
    IntegralDerivative = 4,
    #[strum(to_string = "scanner-bias")]
    ScannerBias = 5,
    #[strum(to_string = "output-limits")]
    OutputLimits = 6,
}

impl RegisterIndex {
    /// Numeric index of the register in the parameter area.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Look up a register by its numeric index.
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::IterationStatus),
            1 => Some(Self::ErrorControl),
            2 => Some(Self::Scale),
            3 => Some(Self::SetpointProportional),
            4 => Some(Self::IntegralDerivative),
            5 => Some(Self::ScannerBias),
            6 => Some(Self::OutputLimits),
            _ => None,
        }
    }

    pub fn encoding(self) -> Encoding {
        match self {
            Self::IterationStatus => Encoding::UintPair,
            _ => Encoding::FloatPair,
        }
    }

    pub fn writer(self) -> Writer {
        match self {
            Self::IterationStatus | Self::ErrorControl => Writer::Rpu,
            _ => Writer::Host,
        }
    }

    /// Names of the (low, high) fields.
    pub fn field_names(self) -> (&'static str, &'static str) {
        match self {
            Self::IterationStatus => ("iterations", "cycle_counter"),
            Self::ErrorControl => ("amplitude_squared", "control_bias"),
            Self::Scale => ("scale", "reserved"),
            Self::SetpointProportional => ("set_point", "kp"),
            Self::IntegralDerivative => ("ki", "kd"),
            Self::ScannerBias => ("x", "y"),
            Self::OutputLimits => ("low", "high"),
        }
    }

    /// Render a raw value according to this register's encoding.
    pub fn describe(self, raw: u64) -> String {
        let (low_name, high_name) = self.field_names();
        match self.encoding() {
            Encoding::UintPair => {
                let (low, high) = decode_uint_pair(raw);
                format!("{self}[{}]: {low_name}={low} {high_name}={high}", self.index())
            }
            Encoding::FloatPair => {
                let (low, high) = decode_float_pair(raw);
                format!(
                    "{self}[{}]: {low_name}={low:e} {high_name}={high:e}",
                    self.index()
                )
            }
        }
    }
}

impl FromStr for RegisterIndex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(idx) = s.parse::<usize>() {
            return Self::from_index(idx).ok_or_else(|| format!("No register at index {idx}"));
        }
        use strum::IntoEnumIterator;
        Self::iter()
            .find(|r| r.to_string() == s)
            .ok_or_else(|| format!("Unknown register: {s}"))
    }
}

/// A typed view of one parameter register.
pub trait Register: Copy + Sized {
    /// Register this value lives in.
    const INDEX: RegisterIndex;

    /// Pack into the raw register value.
    fn encode(&self) -> u64;

    /// Unpack from the raw register value.
    fn decode(raw: u64) -> Self;
}

/// Register 0: iteration counter and RPU cycle counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IterationCount {
    /// Number of processed control-loop iterations (wraps)
    pub iterations: u32,
    /// RPU clock cycles since program start (wraps)
    pub cycle_counter: u32,
}

impl Register for IterationCount {
    const INDEX: RegisterIndex = RegisterIndex::IterationStatus;

    fn encode(&self) -> u64 {
        encode_uint_pair(self.iterations, self.cycle_counter)
    }

    fn decode(raw: u64) -> Self {
        let (iterations, cycle_counter) = decode_uint_pair(raw);
        Self {
            iterations,
            cycle_counter,
        }
    }
}

/// Register 1: current error and control signals.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ErrorControl {
    /// Squared lock-in amplitude (error signal)
    pub amplitude_squared: f32,
    /// Normalized Z bias (control signal)
    pub control_bias: f32,
}

impl Register for ErrorControl {
    const INDEX: RegisterIndex = RegisterIndex::ErrorControl;

    fn encode(&self) -> u64 {
        encode_float_pair(self.amplitude_squared, self.control_bias)
    }

    fn decode(raw: u64) -> Self {
        let (amplitude_squared, control_bias) = decode_float_pair(raw);
        Self {
            amplitude_squared,
            control_bias,
        }
    }
}

/// Register 2: lock-in amplitude scale. High half is reserved and written as 0.0.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScaleParam {
    pub scale: f32,
}

impl Register for ScaleParam {
    const INDEX: RegisterIndex = RegisterIndex::Scale;

    fn encode(&self) -> u64 {
        encode_float_pair(self.scale, 0.0)
    }

    fn decode(raw: u64) -> Self {
        let (scale, _) = decode_float_pair(raw);
        Self { scale }
    }
}

/// Register 3: set point and proportional gain.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SetpointProportional {
    pub set_point: f32,
    pub kp: f32,
}

impl Register for SetpointProportional {
    const INDEX: RegisterIndex = RegisterIndex::SetpointProportional;

    fn encode(&self) -> u64 {
        encode_float_pair(self.set_point, self.kp)
    }

    fn decode(raw: u64) -> Self {
        let (set_point, kp) = decode_float_pair(raw);
        Self { set_point, kp }
    }
}

/// Register 4: integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IntegralDerivative {
    pub ki: f32,
    pub kd: f32,
}

impl Register for IntegralDerivative {
    const INDEX: RegisterIndex = RegisterIndex::IntegralDerivative;

    fn encode(&self) -> u64 {
        encode_float_pair(self.ki, self.kd)
    }

    fn decode(raw: u64) -> Self {
        let (ki, kd) = decode_float_pair(raw);
        Self { ki, kd }
    }
}

/// Register 5: normalized bias of the X and Y scanner piezos.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScannerBias {
    pub x: f32,
    pub y: f32,
}

impl Register for ScannerBias {
    const INDEX: RegisterIndex = RegisterIndex::ScannerBias;

    fn encode(&self) -> u64 {
        encode_float_pair(self.x, self.y)
    }

    fn decode(raw: u64) -> Self {
        let (x, y) = decode_float_pair(raw);
        Self { x, y }
    }
}

/// Register 6: limits of the normalized Z bias.
///
/// `0.0` is full-scale low bias and `1.0` full-scale high bias. Values built
/// with [`OutputLimits::new`] always satisfy `0.0 <= low < high <= 1.0`;
/// values obtained through [`Register::decode`] carry whatever the register
/// held.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputLimits {
    pub low: f32,
    pub high: f32,
}

impl OutputLimits {
    /// Full normalized range.
    pub const FULL: OutputLimits = OutputLimits {
        low: 0.0,
        high: 1.0,
    };

    /// Validate and build output limits.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::InvalidLimits`] unless `0.0 <= low < high <= 1.0`.
    /// NaN in either position is rejected.
    pub fn new(low: f32, high: f32) -> ProtoResult<Self> {
        // NaN fails every comparison below
        let valid = low >= 0.0 && high <= 1.0 && low < high;
        if !valid {
            return Err(ProtoError::InvalidLimits { low, high });
        }
        Ok(Self { low, high })
    }

    /// Limits as the RPU applies them: low raised to 0.0, high lowered to 1.0.
    pub fn clamped(&self) -> Self {
        Self {
            low: self.low.max(0.0),
            high: self.high.min(1.0),
        }
    }
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self::FULL
    }
}

impl Register for OutputLimits {
    const INDEX: RegisterIndex = RegisterIndex::OutputLimits;

    fn encode(&self) -> u64 {
        encode_float_pair(self.low, self.high)
    }

    fn decode(raw: u64) -> Self {
        let (low, high) = decode_float_pair(raw);
        Self { low, high }
    }
}

impl fmt::Display for OutputLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.4}, {:.4}]", self.low, self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_indices_match_firmware_map() {
        let indices: Vec<usize> = RegisterIndex::iter().map(|r| r.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5, 6]);
        assert!(RegisterIndex::iter().all(|r| r.index() < PARAM_REGISTER_COUNT));
    }

    #[test]
    fn test_from_index_round_trip() {
        for reg in RegisterIndex::iter() {
            assert_eq!(RegisterIndex::from_index(reg.index()), Some(reg));
        }
        assert_eq!(RegisterIndex::from_index(7), None);
    }

    #[test]
    fn test_only_iteration_status_is_integer() {
        for reg in RegisterIndex::iter() {
            let expected = if reg == RegisterIndex::IterationStatus {
                Encoding::UintPair
            } else {
                Encoding::FloatPair
            };
            assert_eq!(reg.encoding(), expected);
        }
    }

    #[test]
    fn test_status_registers_written_by_rpu() {
        assert_eq!(RegisterIndex::IterationStatus.writer(), Writer::Rpu);
        assert_eq!(RegisterIndex::ErrorControl.writer(), Writer::Rpu);
        assert_eq!(RegisterIndex::Scale.writer(), Writer::Host);
        assert_eq!(RegisterIndex::OutputLimits.writer(), Writer::Host);
    }

    #[test]
    fn test_parse_register_by_number_or_name() {
        assert_eq!("3".parse::<RegisterIndex>(), Ok(RegisterIndex::SetpointProportional));
        assert_eq!(
            "output-limits".parse::<RegisterIndex>(),
            Ok(RegisterIndex::OutputLimits)
        );
        assert!("9".parse::<RegisterIndex>().is_err());
        assert!("pid".parse::<RegisterIndex>().is_err());
    }

    #[test]
    fn test_scale_reserved_half_is_zero() {
        let raw = ScaleParam { scale: 1.5e-14 }.encode();
        assert_eq!(raw >> 32, 0);
        assert_eq!(ScaleParam::decode(raw).scale, 1.5e-14);
    }

    #[test]
    fn test_iteration_count_decode_keeps_halves() {
        let raw = encode_uint_pair(1234, 0xDEAD_BEEF);
        let count = IterationCount::decode(raw);
        assert_eq!(count.iterations, 1234);
        assert_eq!(count.cycle_counter, 0xDEAD_BEEF);
        assert_eq!(count.encode(), raw);
    }

    #[test]
    fn test_output_limits_validation() {
        assert!(OutputLimits::new(0.2, 0.8).is_ok());
        assert!(OutputLimits::new(0.0, 1.0).is_ok());

        for &(low, high) in &[(0.8, 0.2), (-0.1, 1.0), (0.5, 0.5), (0.0, 1.1)] {
            assert_eq!(
                OutputLimits::new(low, high),
                Err(ProtoError::InvalidLimits { low, high })
            );
        }
        assert!(OutputLimits::new(f32::NAN, 1.0).is_err());
        assert!(OutputLimits::new(0.0, f32::NAN).is_err());
    }

    #[test]
    fn test_output_limits_clamped_like_firmware() {
        let raw = encode_float_pair(-0.5, 3.0);
        let clamped = OutputLimits::decode(raw).clamped();
        assert_eq!(clamped, OutputLimits::FULL);
    }

    #[test]
    fn test_describe_uses_register_encoding() {
        let text = RegisterIndex::IterationStatus.describe(encode_uint_pair(7, 9));
        assert_eq!(text, "iteration-status[0]: iterations=7 cycle_counter=9");

        let text = RegisterIndex::OutputLimits.describe(encode_float_pair(0.5, 1.0));
        assert_eq!(text, "output-limits[6]: low=5e-1 high=1e0");
    }
}
