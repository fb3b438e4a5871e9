//! Byte-level sample decode/encode.
//!
//! Two value domains are used by the engine:
//!
//! - the **raw domain**: the integer value as stored in the lane (floats pass
//!   through unchanged). Mixing sums raw values so that int16 saturation is
//!   bit-exact (`32767`/`-32768`, never a wrap).
//! - the **normalized domain**: `[-1.0, 1.0]` floating point, used by gain,
//!   conversion, and the reference DSP.
//!
//! All encodes saturate to the encoding's representable range. Everything is
//! explicit little-endian coding; no `unsafe`, no transmutes.

use crate::format::SampleEncoding;

/// Full-scale raw magnitude for an encoding (1.0 for floats).
pub const fn raw_scale(encoding: SampleEncoding) -> f64 {
    match encoding {
        SampleEncoding::Int8 => 128.0,
        SampleEncoding::Int16 | SampleEncoding::Int16On32 => 32768.0,
        SampleEncoding::Int24 => 8_388_608.0,
        SampleEncoding::Int32 => 2_147_483_648.0,
        SampleEncoding::Float32 | SampleEncoding::Float64 => 1.0,
    }
}

/// Decode one sample from `bytes` into the raw domain.
///
/// `bytes` must hold at least `encoding.bytes_per_sample()` bytes.
#[inline]
pub fn decode_raw(encoding: SampleEncoding, bytes: &[u8]) -> f64 {
    match encoding {
        SampleEncoding::Int8 => f64::from(bytes[0] as i8),
        SampleEncoding::Int16 => f64::from(i16::from_le_bytes([bytes[0], bytes[1]])),
        SampleEncoding::Int16On32 | SampleEncoding::Int24 | SampleEncoding::Int32 => f64::from(
            i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        ),
        SampleEncoding::Float32 => f64::from(f32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ])),
        SampleEncoding::Float64 => f64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]),
    }
}

/// Encode one raw-domain sample into `out`, saturating to the encoding's
/// representable range. `out` must hold at least
/// `encoding.bytes_per_sample()` bytes.
#[inline]
pub fn encode_raw(encoding: SampleEncoding, value: f64, out: &mut [u8]) {
    match encoding {
        SampleEncoding::Int8 => {
            let v = value.round().clamp(-128.0, 127.0) as i8;
            out[0] = v as u8;
        }
        SampleEncoding::Int16 => {
            let v = value.round().clamp(-32768.0, 32767.0) as i16;
            out[..2].copy_from_slice(&v.to_le_bytes());
        }
        SampleEncoding::Int16On32 => {
            // Saturates at the *int16* range: the lane is wide, the value is not.
            let v = value.round().clamp(-32768.0, 32767.0) as i32;
            out[..4].copy_from_slice(&v.to_le_bytes());
        }
        SampleEncoding::Int24 => {
            let v = value.round().clamp(-8_388_608.0, 8_388_607.0) as i32;
            out[..4].copy_from_slice(&v.to_le_bytes());
        }
        SampleEncoding::Int32 => {
            let v = value.round().clamp(-2_147_483_648.0, 2_147_483_647.0) as i32;
            out[..4].copy_from_slice(&v.to_le_bytes());
        }
        SampleEncoding::Float32 => {
            out[..4].copy_from_slice(&(value as f32).to_le_bytes());
        }
        SampleEncoding::Float64 => {
            out[..8].copy_from_slice(&value.to_le_bytes());
        }
    }
}

/// Decode one sample into the normalized `[-1, 1]` domain.
#[inline]
pub fn decode_norm(encoding: SampleEncoding, bytes: &[u8]) -> f64 {
    decode_raw(encoding, bytes) / raw_scale(encoding)
}

/// Encode one normalized-domain sample, saturating.
#[inline]
pub fn encode_norm(encoding: SampleEncoding, value: f64, out: &mut [u8]) {
    encode_raw(encoding, value * raw_scale(encoding), out);
}

/// Decode `samples.len() / bytes_per_sample` interleaved samples from `bytes`
/// into normalized values, appending to `out`.
pub fn decode_norm_buffer(encoding: SampleEncoding, bytes: &[u8], out: &mut Vec<f64>) {
    let step = encoding.bytes_per_sample();
    for chunk in bytes.chunks_exact(step) {
        out.push(decode_norm(encoding, chunk));
    }
}

/// Encode normalized values into `out` (appended), saturating each.
pub fn encode_norm_buffer(encoding: SampleEncoding, values: &[f64], out: &mut Vec<u8>) {
    let step = encoding.bytes_per_sample();
    let start = out.len();
    out.resize(start + values.len() * step, 0);
    for (i, &v) in values.iter().enumerate() {
        encode_norm(encoding, v, &mut out[start + i * step..start + (i + 1) * step]);
    }
}
