//! Quote source.

use rand::Rng;

/// A quote record.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    /// Quote text.
    pub text: String,
    /// Attributed author.
    pub author: String,
}

impl Quote {
    fn new(text: &str, author: &str) -> Self {
        Self {
            text: text.to_string(),
            author: author.to_string(),
        }
    }
}

/// Source of quotes served to verified clients.
///
/// Implementations must be non-blocking and always return a record.
pub trait QuoteSource: Send + Sync {
    /// Pick the next quote to serve.
    fn next_quote(&self) -> Quote;
}

/// Built-in quote corpus, served uniformly at random.
pub struct QuoteBook {
    quotes: Vec<Quote>,
}

impl QuoteBook {
    /// Create a book with the built-in corpus.
    pub fn new() -> Self {
        Self {
            quotes: vec![
                Quote::new(
                    "The only true wisdom is in knowing you know nothing.",
                    "Socrates",
                ),
                Quote::new(
                    "Life is really simple, but we insist on making it complicated.",
                    "Confucius",
                ),
                Quote::new("The unexamined life is not worth living.", "Socrates"),
                Quote::new(
                    "The journey of a thousand miles begins with one step.",
                    "Lao Tzu",
                ),
                Quote::new(
                    "Knowing yourself is the beginning of all wisdom.",
                    "Aristotle",
                ),
                Quote::new(
                    "It is the mark of an educated mind to be able to entertain a thought without accepting it.",
                    "Aristotle",
                ),
            ],
        }
    }

    /// Create a book from a custom corpus.
    ///
    /// An empty corpus falls back to the built-in one so the source can
    /// always return a record.
    pub fn with_quotes(quotes: Vec<Quote>) -> Self {
        if quotes.is_empty() {
            Self::new()
        } else {
            Self { quotes }
        }
    }

    /// Number of quotes in the corpus.
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    /// Whether the corpus is empty (never true, see `with_quotes`).
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }
}

impl Default for QuoteBook {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteSource for QuoteBook {
    fn next_quote(&self) -> Quote {
        let index = rand::thread_rng().gen_range(0..self.quotes.len());
        self.quotes[index].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_always_returns_a_quote() {
        let book = QuoteBook::new();
        for _ in 0..32 {
            let quote = book.next_quote();
            assert!(!quote.text.is_empty());
            assert!(!quote.author.is_empty());
        }
    }

    #[test]
    fn test_empty_corpus_falls_back() {
        let book = QuoteBook::with_quotes(Vec::new());
        assert!(!book.is_empty());
    }

    #[test]
    fn test_custom_corpus() {
        let book = QuoteBook::with_quotes(vec![Quote::new("x", "y")]);
        assert_eq!(book.len(), 1);
        assert_eq!(book.next_quote(), Quote::new("x", "y"));
    }
}
