//! Sentiment classifier backed by a serialized model artifact
//!
//! The artifact carries a vocabulary of token weights and a bias, the
//! distilled form of a trained text-classification pipeline. The scoring
//! itself is deliberately opaque to the rest of the service: callers get
//! a label and a confidence and nothing else.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Serialized model parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Label reported for positive scores
    #[serde(default = "default_positive_label")]
    pub positive_label: String,

    /// Label reported for negative scores
    #[serde(default = "default_negative_label")]
    pub negative_label: String,

    /// Intercept added to every score
    #[serde(default)]
    pub bias: f64,

    /// Per-token weights
    pub weights: HashMap<String, f64>,
}

fn default_positive_label() -> String {
    "positive".to_string()
}

fn default_negative_label() -> String {
    "negative".to_string()
}

/// A single classification outcome
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

/// Pre-trained sentiment classifier
pub struct Classifier {
    artifact: ModelArtifact,
}

impl Classifier {
    /// Wrap an already-deserialized artifact
    pub fn from_artifact(artifact: ModelArtifact) -> Self {
        Self { artifact }
    }

    /// Load the model artifact from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .context(format!("Failed to read model artifact: {:?}", path.as_ref()))?;

        let artifact: ModelArtifact =
            serde_json::from_str(&content).context("Failed to parse model artifact")?;

        Ok(Self::from_artifact(artifact))
    }

    /// Classify one input text.
    ///
    /// Total over all inputs: unknown tokens contribute nothing and an
    /// empty text is decided by the bias alone. Confidence is the
    /// probability of the winning label, so it is always in [0.5, 1.0].
    pub fn predict(&self, text: &str) -> Prediction {
        let score: f64 = self.artifact.bias
            + tokenize(text)
                .filter_map(|token| self.artifact.weights.get(token.as_str()))
                .sum::<f64>();

        let positive_probability = 1.0 / (1.0 + (-score).exp());

        if positive_probability >= 0.5 {
            Prediction {
                label: self.artifact.positive_label.clone(),
                confidence: positive_probability,
            }
        } else {
            Prediction {
                label: self.artifact.negative_label.clone(),
                confidence: 1.0 - positive_probability,
            }
        }
    }
}

/// Lowercased alphanumeric tokens of the input
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_artifact() -> ModelArtifact {
        let mut weights = HashMap::new();
        weights.insert("great".to_string(), 2.0);
        weights.insert("love".to_string(), 1.5);
        weights.insert("terrible".to_string(), -2.0);
        weights.insert("waste".to_string(), -1.5);

        ModelArtifact {
            positive_label: "positive".to_string(),
            negative_label: "negative".to_string(),
            bias: 0.1,
            weights,
        }
    }

    #[test]
    fn test_predict_positive() {
        let classifier = Classifier::from_artifact(test_artifact());
        let prediction = classifier.predict("I love this, great product!");

        assert_eq!(prediction.label, "positive");
        assert!(prediction.confidence > 0.9);
    }

    #[test]
    fn test_predict_negative() {
        let classifier = Classifier::from_artifact(test_artifact());
        let prediction = classifier.predict("Terrible experience, waste of money");

        assert_eq!(prediction.label, "negative");
        assert!(prediction.confidence > 0.9);
    }

    #[test]
    fn test_predict_is_total() {
        let classifier = Classifier::from_artifact(test_artifact());

        for text in ["", "    ", "zxqj unknown tokens only", "123 !!!"] {
            let prediction = classifier.predict(text);
            assert!(prediction.confidence >= 0.5);
            assert!(prediction.confidence <= 1.0);
        }

        // With only the (positive) bias in play, the tie breaks positive.
        assert_eq!(classifier.predict("").label, "positive");
    }

    #[test]
    fn test_tokenize_splits_punctuation() {
        let tokens: Vec<String> = tokenize("Great, really GREAT!").collect();
        assert_eq!(tokens, vec!["great", "really", "great"]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"bias": 0.0, "weights": {{"good": 1.0, "bad": -1.0}}}}"#
        )
        .unwrap();

        let classifier = Classifier::load(file.path()).unwrap();
        assert_eq!(classifier.predict("good").label, "positive");
        assert_eq!(classifier.predict("bad").label, "negative");
    }

    #[test]
    fn test_load_rejects_malformed_artifact() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        assert!(Classifier::load(file.path()).is_err());
    }
}
