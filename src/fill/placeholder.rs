use once_cell::sync::Lazy;
use regex::Regex;

static SINGLE_BRACKET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[|\]$").expect("single bracket regex"));
static DOUBLE_BRACKET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[\[?|\]?\]$").expect("double bracket regex"));
static BRACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\{\{?|\}?\}$").expect("brace regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Canonical lookup key for a label or data key.
///
/// Strips surrounding `[..]`, `[[..]]` and `{{..}}` (each side independently),
/// collapses whitespace runs to one space and upper-cases. The stripping is
/// repeated until the key stops changing, so normalizing a key twice never
/// changes it further.
pub fn normalize_key(raw: &str) -> String {
    let mut key = normalize_once(raw);
    loop {
        let next = normalize_once(&key);
        if next == key {
            return key;
        }
        key = next;
    }
}

fn normalize_once(raw: &str) -> String {
    let s = raw.trim();
    let s = SINGLE_BRACKET_RE.replace_all(s, "");
    let s = DOUBLE_BRACKET_RE.replace_all(&s, "");
    let s = BRACE_RE.replace_all(&s, "");
    let s = WHITESPACE_RE.replace_all(&s, " ");
    s.trim().to_uppercase()
}

/// The literal spellings of `key` recognised in document text.
pub fn token_forms(key: &str) -> [String; 5] {
    [
        key.to_string(),
        format!("[{key}]"),
        format!("[[{key}]]"),
        format!("{{{{{key}}}}}"),
        format!("__{key}__"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_decorations() {
        assert_eq!(normalize_key("[CLIENTE]"), "CLIENTE");
        assert_eq!(normalize_key("[[CLIENTE]]"), "CLIENTE");
        assert_eq!(normalize_key("{{CNPJ}}"), "CNPJ");
        assert_eq!(normalize_key("{CNPJ}"), "CNPJ");
        assert_eq!(normalize_key("[cnpj"), "CNPJ");
        assert_eq!(normalize_key("cnpj]"), "CNPJ");
    }

    #[test]
    fn collapses_whitespace_and_uppercases() {
        assert_eq!(normalize_key("  foro  cidade "), "FORO CIDADE");
        assert_eq!(normalize_key("data\t\ndia"), "DATA DIA");
        assert_eq!(normalize_key("[ foro cidade ]"), "FORO CIDADE");
        assert_eq!(normalize_key("ação"), "AÇÃO");
    }

    #[test]
    fn empty_and_blank_are_empty() {
        assert_eq!(normalize_key(""), "");
        assert_eq!(normalize_key("   \t"), "");
        assert_eq!(normalize_key("[]"), "");
        assert_eq!(normalize_key("{{}}"), "");
    }

    #[test]
    fn idempotent_on_awkward_inputs() {
        let samples = [
            "[CLIENTE]",
            "[[[x]]]",
            "{{[a]}}",
            "[{{ b }}]",
            " [ [c] ] ",
            "{{{d}}}",
            "]]e[[",
            "__F__",
            "a  b   c",
            "[",
            "}}",
            "",
        ];
        for s in samples {
            let once = normalize_key(s);
            assert_eq!(normalize_key(&once), once, "input {s:?}");
        }
    }

    #[test]
    fn five_token_forms() {
        let forms = token_forms("CNPJ");
        assert_eq!(forms, ["CNPJ", "[CNPJ]", "[[CNPJ]]", "{{CNPJ}}", "__CNPJ__"]);
    }
}
