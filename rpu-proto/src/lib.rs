#![doc = include_str!("../README.md")]

pub mod codec;
pub mod error;
pub mod registers;
pub mod scale;

pub use codec::{
    decode_float_pair, decode_uint_pair, encode_float_pair, encode_uint_pair, from_wire_bytes,
    to_wire_bytes,
};
pub use error::{ProtoError, ProtoResult};
pub use registers::{
    Encoding, ErrorControl, IntegralDerivative, IterationCount, OutputLimits, Register,
    RegisterIndex, ScaleParam, ScannerBias, SetpointProportional, Writer, PARAM_REGISTER_COUNT,
};
pub use scale::{compute_scale, ACCUMULATOR_MAX};
