use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref WORD_RE: Regex = Regex::new(r"(?u)[\p{L}\p{N}][\p{L}\p{N}_']*").expect("valid regex");
    static ref CJK_RE: Regex =
        Regex::new(r"^[\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}]$").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

/// Analysis strategy applied to a field, both at index time and at query time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Analyzer {
    /// Word-boundary tokens, stopwords removed, English stemming.
    #[default]
    Standard,
    /// Word-boundary tokens with CJK runs split into overlapping bigrams.
    Cjk,
}

impl Analyzer {
    pub fn analyze(&self, text: &str) -> Vec<(String, usize)> {
        match self {
            Analyzer::Standard => tokenize(text),
            Analyzer::Cjk => tokenize_cjk(text),
        }
    }
}

fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

fn is_cjk(c: char) -> bool {
    let mut buf = [0u8; 4];
    CJK_RE.is_match(c.encode_utf8(&mut buf))
}

fn normalize(text: &str) -> String {
    text.nfkc().collect::<String>().to_lowercase()
}

/// Tokenize text into (term, position) using NFKC normalization, lowercase, stopword removal, and stemming.
pub fn tokenize(text: &str) -> Vec<(String, usize)> {
    let normalized = normalize(text);
    let mut tokens = Vec::new();
    for (pos, mat) in WORD_RE.find_iter(&normalized).enumerate() {
        let token = mat.as_str();
        if is_stopword(token) { continue; }
        let stem = STEMMER.stem(token).to_string();
        tokens.push((stem, pos));
    }
    tokens
}

/// Tokenize text for languages without word delimiters.
///
/// Runs of CJK characters become overlapping bigrams ("東京都" -> "東京", "京都"),
/// a single isolated CJK character is kept as is. Other words are lowercased
/// but neither stemmed nor stopword-filtered. Positions count emitted tokens.
pub fn tokenize_cjk(text: &str) -> Vec<(String, usize)> {
    let normalized = normalize(text);
    let mut tokens = Vec::new();
    for mat in WORD_RE.find_iter(&normalized) {
        let mut run: Vec<char> = Vec::new();
        let mut other = String::new();
        for c in mat.as_str().chars() {
            if is_cjk(c) {
                flush_word(&mut other, &mut tokens);
                run.push(c);
            } else {
                flush_cjk_run(&mut run, &mut tokens);
                other.push(c);
            }
        }
        flush_word(&mut other, &mut tokens);
        flush_cjk_run(&mut run, &mut tokens);
    }
    tokens
}

fn flush_word(word: &mut String, tokens: &mut Vec<(String, usize)>) {
    if word.is_empty() { return; }
    let pos = tokens.len();
    tokens.push((std::mem::take(word), pos));
}

fn flush_cjk_run(run: &mut Vec<char>, tokens: &mut Vec<(String, usize)>) {
    match run.len() {
        0 => {}
        1 => {
            let pos = tokens.len();
            tokens.push((run[0].to_string(), pos));
        }
        _ => {
            for pair in run.windows(2) {
                let pos = tokens.len();
                tokens.push((pair.iter().collect(), pos));
            }
        }
    }
    run.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(tokens: Vec<(String, usize)>) -> Vec<String> {
        tokens.into_iter().map(|(w, _)| w).collect()
    }

    #[test]
    fn basic_tokenize() {
        let t = tokenize("Running, runner's run!");
        assert!(t.iter().any(|(w, _)| w == "run"));
    }

    #[test]
    fn positions_skip_stopwords() {
        let t = tokenize("the quick brown fox");
        assert_eq!(t[0], ("quick".to_string(), 1));
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn cjk_bigrams() {
        assert_eq!(terms(tokenize_cjk("東京都")), vec!["東京", "京都"]);
        assert_eq!(terms(tokenize_cjk("猫")), vec!["猫"]);
    }

    #[test]
    fn cjk_keeps_latin_words() {
        let t = terms(tokenize_cjk("Rust 언어입니다 The"));
        assert_eq!(t, vec!["rust", "언어", "어입", "입니", "니다", "the"]);
    }

    #[test]
    fn cjk_folds_full_width() {
        assert_eq!(terms(tokenize_cjk("ＲＵＳＴ")), vec!["rust"]);
    }

    #[test]
    fn analyzer_dispatch() {
        assert_eq!(terms(Analyzer::Standard.analyze("Foxes")), vec!["fox"]);
        assert_eq!(terms(Analyzer::Cjk.analyze("Foxes")), vec!["foxes"]);
    }
}
