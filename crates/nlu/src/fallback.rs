use concourse_retrieval::EmbeddingModel;

/// Signed feature hashing over whitespace tokens and Hangul syllable bigrams.
#[derive(Debug, Clone)]
pub struct HashEmbeddingModel {
    dims: usize,
}

impl HashEmbeddingModel {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(32) }
    }

    fn add(&self, vec: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let index = (hash as usize) % self.dims;
        let sign = if (hash & 1) == 0 { 1.0 } else { -1.0 };
        vec[index] += sign * weight;
    }
}

impl EmbeddingModel for HashEmbeddingModel {
    fn model_name(&self) -> &'static str {
        "hash-fallback"
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0_f32; self.dims];

        for token in text.split_whitespace() {
            let lower = token.to_lowercase();
            self.add(&mut vec, &lower, 1.0);

            let chars = lower.chars().collect::<Vec<_>>();
            for pair in chars.windows(2) {
                let bigram = pair.iter().collect::<String>();
                self.add(&mut vec, &bigram, 0.5);
            }
        }

        normalize(&mut vec);
        vec
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub(crate) fn normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in values.iter_mut() {
            *value /= norm;
        }
    }
}
