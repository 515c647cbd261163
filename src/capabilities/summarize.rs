//! Extractive summarization (TextRank over TF-IDF sentence similarity)

use super::{Capability, CapabilityError, CapabilityRequest, Inference};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use unicode_segmentation::UnicodeSegmentation;

const DAMPING: f64 = 0.85;
const MAX_ITERATIONS: usize = 100;
const TOLERANCE: f64 = 1e-6;
const DEFAULT_SENTENCES: usize = 3;

/// Split text into trimmed, non-empty sentences
#[must_use]
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.unicode_sentences()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn tokens(sentence: &str) -> Vec<String> {
    sentence
        .unicode_words()
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() > 2)
        .collect()
}

fn tf_idf(sentences: &[&str]) -> Vec<HashMap<String, f64>> {
    let docs: Vec<Vec<String>> = sentences.iter().map(|s| tokens(s)).collect();
    let n = docs.len() as f64;

    let mut df: HashMap<&str, usize> = HashMap::new();
    for doc in &docs {
        let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
        for term in unique {
            *df.entry(term).or_default() += 1;
        }
    }

    docs.iter()
        .map(|doc| {
            let mut tf: HashMap<String, f64> = HashMap::new();
            for term in doc {
                *tf.entry(term.clone()).or_default() += 1.0;
            }
            for (term, weight) in &mut tf {
                let df = df.get(term.as_str()).copied().unwrap_or(1) as f64;
                *weight *= ((1.0 + n) / (1.0 + df)).ln() + 1.0;
            }
            tf
        })
        .collect()
}

fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(term, wa)| b.get(term).map(|wb| wa * wb))
        .sum();
    let norm = |v: &HashMap<String, f64>| v.values().map(|w| w * w).sum::<f64>().sqrt();
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// PageRank over a weighted, undirected similarity graph
fn pagerank(weights: &[Vec<f64>]) -> Vec<f64> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let uniform = 1.0 / n as f64;
    let out_sums: Vec<f64> = weights.iter().map(|row| row.iter().sum()).collect();
    let mut scores = vec![uniform; n];

    for _ in 0..MAX_ITERATIONS {
        // Rank of nodes without edges is spread over the whole graph
        let dangling: f64 = scores
            .iter()
            .zip(&out_sums)
            .filter(|(_, sum)| **sum == 0.0)
            .map(|(score, _)| score)
            .sum();

        let next: Vec<f64> = (0..n)
            .map(|i| {
                let incoming: f64 = (0..n)
                    .filter(|&j| out_sums[j] > 0.0)
                    .map(|j| weights[j][i] / out_sums[j] * scores[j])
                    .sum();
                (1.0 - DAMPING) * uniform + DAMPING * (incoming + dangling * uniform)
            })
            .collect();

        let delta: f64 = next.iter().zip(&scores).map(|(a, b)| (a - b).abs()).sum();
        scores = next;
        if delta < TOLERANCE * n as f64 {
            break;
        }
    }
    scores
}

/// Pick the `k` highest-ranked sentences and return them in original order
#[must_use]
pub fn summarize(text: &str, k: usize) -> Vec<&str> {
    let sentences = split_sentences(text);
    if sentences.len() <= k {
        return sentences;
    }

    let vectors = tf_idf(&sentences);
    let weights: Vec<Vec<f64>> = (0..vectors.len())
        .map(|i| {
            (0..vectors.len())
                .map(|j| if i == j { 0.0 } else { cosine(&vectors[i], &vectors[j]) })
                .collect()
        })
        .collect();
    let scores = pagerank(&weights);

    let mut ranked: Vec<usize> = (0..sentences.len()).collect();
    ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    let mut chosen: Vec<usize> = ranked.into_iter().take(k).collect();
    chosen.sort_unstable();

    chosen.into_iter().map(|i| sentences[i]).collect()
}

/// Local summarizer
#[derive(Debug, Default, Clone, Copy)]
pub struct TextRankSummarizer;

impl TextRankSummarizer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Capability for TextRankSummarizer {
    async fn invoke(&self, request: &CapabilityRequest) -> Result<Inference, CapabilityError> {
        if request.text.trim().is_empty() {
            return Err(CapabilityError::InvalidInput("empty text".to_string()));
        }
        let k = request.max_sentences.unwrap_or(DEFAULT_SENTENCES).max(1);
        Ok(Inference::Text(summarize(&request.text, k).join("\n")))
    }
}
