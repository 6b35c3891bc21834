use rubato::{Resampler, FastFixedIn, PolynomialDegree};
use anyhow::Result;

/// Mono resampler from a source stream rate to the output device rate.
pub struct AudioResampler {
    resampler: FastFixedIn<f32>,
    input_buffer: Vec<f32>,
    source_rate: u32,
}

impl AudioResampler {
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        // FastFixedIn keeps latency low and chunk sizes predictable
        let resampler = FastFixedIn::<f32>::new(
            target_rate as f64 / source_rate as f64,
            2.0, // max ratio
            PolynomialDegree::Linear,
            chunk_size,
            1, // mono
        )?;

        Ok(Self {
            resampler,
            input_buffer: Vec::new(),
            source_rate,
        })
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    /// Resamples whole chunks; a partial chunk stays buffered for the next call.
    pub fn resample(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let mut output = Vec::new();
        let chunk_size = self.resampler.input_frames_next();

        self.input_buffer.extend_from_slice(input);

        while self.input_buffer.len() >= chunk_size {
            let chunk: Vec<f32> = self.input_buffer.drain(..chunk_size).collect();
            let mut resampled = self.resampler.process(&[chunk], None)?;
            output.append(&mut resampled[0]);
        }

        Ok(output)
    }

    pub fn reset(&mut self) {
        self.input_buffer.clear();
        self.resampler.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsample_doubles_length() {
        let mut rs = AudioResampler::new(24000, 48000, 240).unwrap();
        let out = rs.resample(&vec![0.5; 960]).unwrap();
        // 4 whole chunks of 240 -> ~480 each
        assert!(out.len() > 1800 && out.len() < 2000, "got {}", out.len());
    }

    #[test]
    fn test_partial_chunk_is_held() {
        let mut rs = AudioResampler::new(24000, 48000, 240).unwrap();
        assert!(rs.resample(&vec![0.0; 100]).unwrap().is_empty());
        assert!(!rs.resample(&vec![0.0; 140]).unwrap().is_empty());
    }
}
