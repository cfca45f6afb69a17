//! Handle normalization: the single spelling rule for usernames and share
//! slugs. Lowercase ASCII letters and digits, hyphen-separated, no leading
//! or trailing hyphens.

/// Fold common Latin letters with diacritics to their ASCII base. Anything
/// not covered is dropped from the handle rather than hyphenated.
fn fold_latin(c: char) -> Option<&'static str> {
    let folded = match c {
        'à'..='å' | 'À'..='Å' | 'ā' | 'ă' | 'ą' => "a",
        'æ' | 'Æ' => "ae",
        'ç' | 'Ç' | 'ć' | 'č' => "c",
        'ď' | 'đ' | 'ð' | 'Ð' => "d",
        'è'..='ë' | 'È'..='Ë' | 'ē' | 'ė' | 'ę' | 'ě' => "e",
        'ì'..='ï' | 'Ì'..='Ï' | 'ī' | 'į' => "i",
        'ł' | 'Ł' => "l",
        'ñ' | 'Ñ' | 'ń' | 'ň' => "n",
        'ò'..='ö' | 'Ò'..='Ö' | 'ø' | 'Ø' | 'ō' | 'ő' => "o",
        'œ' | 'Œ' => "oe",
        'ŕ' | 'ř' => "r",
        'ś' | 'š' | 'ş' => "s",
        'ß' => "ss",
        'ť' | 'ţ' | 'þ' | 'Þ' => "t",
        'ù'..='ü' | 'Ù'..='Ü' | 'ū' | 'ů' | 'ű' => "u",
        'ý' | 'ÿ' | 'Ý' => "y",
        'ź' | 'ż' | 'ž' => "z",
        _ => return None,
    };
    Some(folded)
}

/// Normalize a requested handle: lowercase, fold diacritics, collapse
/// non-alphanumeric runs to single hyphens, trim hyphens, truncate.
pub fn normalize_handle(source: &str, max_length: usize) -> String {
    let mut out = String::with_capacity(source.len().min(max_length));
    let mut pending_separator = false;

    for c in source.chars() {
        let folded: Option<String> = if c.is_ascii_alphanumeric() {
            Some(c.to_ascii_lowercase().to_string())
        } else if c.is_ascii() {
            // Punctuation and whitespace separate words
            pending_separator = true;
            None
        } else {
            // Non-ASCII: fold if we can, silently drop otherwise
            fold_latin(c).map(str::to_string)
        };

        if let Some(folded) = folded {
            if pending_separator && !out.is_empty() {
                out.push('-');
                pending_separator = false;
            }
            out.push_str(&folded);
        }
    }

    out.truncate(max_length);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Derive a share slug from the prompt text, with a safety-net fallback.
pub fn derive_slug_from_title(title: &str, max_length: usize) -> String {
    let normalized = normalize_handle(title, max_length);
    if normalized.is_empty() {
        "image".to_string()
    } else {
        normalized
    }
}
