//! G.711 mu-law codec adapting telephony wire audio to linear PCM.

const BIAS: i32 = 0x84;
const CLIP: i32 = 32_635;

pub fn encode_sample(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign: u8 = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    if pcm > CLIP {
        pcm = CLIP;
    }
    pcm += BIAS;

    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (pcm & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((pcm >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

pub fn decode_sample(byte: u8) -> i16 {
    let b = !byte;
    let sign = b & 0x80;
    let exponent = (b >> 4) & 0x07;
    let mantissa = (b & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

pub fn encode(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| encode_sample(s)).collect()
}

pub fn decode(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| decode_sample(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_encodes_to_ff() {
        assert_eq!(encode_sample(0), 0xFF);
        assert_eq!(decode_sample(0xFF), 0);
    }

    #[test]
    fn codec_is_sign_symmetric() {
        for &s in &[100i16, 1_000, 8_000, 30_000] {
            assert_eq!(decode_sample(encode_sample(s)), -decode_sample(encode_sample(-s)));
        }
    }

    #[test]
    fn round_trip_error_is_logarithmically_bounded() {
        for &s in &[0i16, 16, 128, 512, 2_048, 8_192, 20_000, 32_000] {
            let out = decode_sample(encode_sample(s)) as i32;
            let err = (out - s as i32).abs();
            // Quantization step grows with magnitude; allow ~3% of the value
            // plus the smallest step.
            let bound = (s as i32) / 32 + 16;
            assert!(err <= bound, "sample {s}: decoded {out}, err {err} > {bound}");
        }
    }

    #[test]
    fn slice_helpers_round_trip() {
        let samples: Vec<i16> = (0..160).map(|i| ((i * 199) % 12_000) as i16).collect();
        let decoded = decode(&encode(&samples));
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(&decoded) {
            assert!((a - b).abs() < 1_024);
        }
    }
}
