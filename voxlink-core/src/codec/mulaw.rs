//! G.711 mu-law companding.

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;

/// Compress one linear PCM16 sample to an 8-bit mu-law code.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0x00
    };
    pcm = pcm.min(CLIP) + BIAS;

    // pcm >= BIAS, so (pcm >> 7) is at least 1 and at most 0xFF.
    let exponent = 31 - ((pcm >> 7) as u32).leading_zeros();
    let mantissa = (pcm >> (exponent + 3)) & 0x0F;
    !(sign | ((exponent as i32) << 4) | mantissa) as u8
}

/// Expand one mu-law code to linear PCM16.
pub fn mulaw_to_linear(code: u8) -> i16 {
    let u = !code;
    let exponent = ((u >> 4) & 0x07) as i32;
    let mantissa = (u & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if u & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Expand a mu-law byte stream into little-endian PCM16 bytes.
pub fn expand_to_pcm16(codes: &[u8], out: &mut Vec<u8>) {
    out.reserve(codes.len() * 2);
    for &c in codes {
        out.extend_from_slice(&mulaw_to_linear(c).to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_and_extremes() {
        assert_eq!(linear_to_mulaw(0), 0xFF);
        assert_eq!(mulaw_to_linear(0xFF), 0);
        assert_eq!(mulaw_to_linear(0x00), -32124);
        assert_eq!(mulaw_to_linear(0x80), 32124);
        assert_eq!(linear_to_mulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_mulaw(i16::MIN), 0x00);
    }

    #[test]
    fn companding_preserves_sign_and_rough_magnitude() {
        for sample in [-30_000i16, -1_200, -40, 40, 1_200, 30_000] {
            let back = mulaw_to_linear(linear_to_mulaw(sample));
            assert_eq!(back.signum(), sample.signum(), "sample {sample}");
            let err = (back as i32 - sample as i32).abs();
            // Quantisation step grows with magnitude; 1/16 of the value plus the bias floor.
            assert!(err <= (sample as i32).abs() / 16 + 8, "sample {sample} -> {back}");
        }
    }

    #[test]
    fn expansion_emits_little_endian_pairs() {
        let mut out = Vec::new();
        expand_to_pcm16(&[0xFF, 0x80], &mut out);
        assert_eq!(out.len(), 4);
        assert_eq!(&out[..2], &[0, 0]);
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), 32124);
    }
}
