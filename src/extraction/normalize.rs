//! Text normalization for content hashing and duplicate detection.

/// Lowercases, drops punctuation and collapses whitespace.
///
/// Two texts that differ only in case, punctuation or spacing normalize to
/// the same string.
#[must_use]
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for token in tokens(text) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(token.chars().flat_map(char::to_lowercase));
    }
    out
}

/// Alphanumeric runs of `text`, in order.
pub fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_case_punctuation_and_spacing() {
        assert_eq!(normalize("  Is X hazardous?"), "is x hazardous");
        assert_eq!(normalize("is   x,\nHAZARDOUS"), "is x hazardous");
    }

    #[test]
    fn keeps_non_ascii_letters() {
        assert_eq!(normalize("Überschwemmung: Risiko!"), "überschwemmung risiko");
    }

    #[test]
    fn blank_input_is_empty() {
        assert_eq!(normalize(" ... "), "");
    }
}
