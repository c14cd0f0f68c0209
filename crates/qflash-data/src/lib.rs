//! # qflash-data
//!
//! Raw tensor files, output encodings and seeded fixtures.

pub mod encoding;
pub mod fixture;
pub mod io;

pub use encoding::{decode_fixed16, encode_fixed16, OutputEncoding};
pub use fixture::{generate_fixture, Fixture, OUTPUT_FILE};
pub use io::{
    read_f32_tensor, read_i8_tensor, read_quantized, read_scales, write_f32_tensor,
    write_i8_tensor, write_quantized, write_scales,
};
