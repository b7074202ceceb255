pub fn normalize_text(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut pending: Option<char> = None;

    for ch in text.chars() {
        if is_kept(ch) {
            if let Some(separator) = pending.take() {
                if !normalized.is_empty() {
                    normalized.push(separator);
                }
            }
            normalized.push(ch);
            continue;
        }

        let separator = if ch == '\n' || ch == '\r' { '\n' } else { ' ' };
        pending = match pending {
            Some('\n') => Some('\n'),
            _ => Some(separator),
        };
    }

    normalized
}

fn is_kept(ch: char) -> bool {
    if ch.is_whitespace() {
        return false;
    }
    ch.is_alphanumeric() || ch == '_' || is_cjk_ideograph(ch)
}

fn is_cjk_ideograph(ch: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&ch)
}
