//! Sentiment labelling of message text.
//!
//! The label is stored with the message and shown by clients; the relay never
//! looks at it. [`LexiconScorer`] is a small word-list scorer: each positive
//! word counts +1, each negative word -1, and a negator directly before a word
//! flips it. The score is normalised by the number of words.

use parley_proto::Sentiment;

pub trait SentimentScorer: Send + Sync {
    /// Label and score in `[-1, 1]`.
    fn score(&self, text: &str) -> (Sentiment, f64);
}

const POSITIVE: &[&str] = &[
    "good", "great", "love", "happy", "awesome", "amazing", "nice", "thanks", "thank", "excellent",
    "wonderful", "glad", "fun", "cool", "perfect", "best", "like", "yay",
];

const NEGATIVE: &[&str] = &[
    "bad", "terrible", "hate", "sad", "awful", "angry", "worst", "horrible", "annoying", "sorry",
    "upset", "boring", "ugly", "wrong", "broken", "hurt",
];

const NEGATORS: &[&str] = &["not", "no", "never", "dont", "don't", "isnt", "isn't"];

#[derive(Debug, Default, Clone, Copy)]
pub struct LexiconScorer;

impl SentimentScorer for LexiconScorer {
    fn score(&self, text: &str) -> (Sentiment, f64) {
        let words: Vec<String> = text
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return (Sentiment::Neutral, 0.0);
        }

        let mut total = 0i32;
        for (i, word) in words.iter().enumerate() {
            let polarity = if POSITIVE.contains(&word.as_str()) {
                1
            } else if NEGATIVE.contains(&word.as_str()) {
                -1
            } else {
                continue;
            };
            let negated = i > 0 && NEGATORS.contains(&words[i - 1].as_str());
            total += if negated { -polarity } else { polarity };
        }

        let score = f64::from(total) / words.len() as f64;
        let label = match total {
            t if t > 0 => Sentiment::Positive,
            t if t < 0 => Sentiment::Negative,
            _ => Sentiment::Neutral,
        };
        (label, score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_by_word_polarity() {
        assert_eq!(LexiconScorer.score("I love this, great job!").0, Sentiment::Positive);
        assert_eq!(LexiconScorer.score("this is terrible").0, Sentiment::Negative);
        assert_eq!(LexiconScorer.score("see you at noon").0, Sentiment::Neutral);
    }

    #[test]
    fn negator_flips_the_next_word() {
        let (label, score) = LexiconScorer.score("not good");
        assert_eq!(label, Sentiment::Negative);
        assert!(score < 0.0);
    }

    #[test]
    fn blank_text_is_neutral() {
        assert_eq!(LexiconScorer.score("  ... "), (Sentiment::Neutral, 0.0));
    }
}
