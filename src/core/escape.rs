//! Character and entity reference handling.

/// Decode the predefined entities and numeric character references in `raw`.
///
/// Unknown entity references are left untouched and reported through the
/// return value so the caller can decide whether that is fatal.
/// Returns the decoded text and the name of the first unknown entity, if any.
pub fn decode_entities(raw: &str) -> (String, Option<String>) {
    if !raw.contains('&') {
        return (raw.to_string(), None);
    }

    let mut out = String::with_capacity(raw.len());
    let mut unknown = None;
    let mut rest = raw;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match tail.find(';') {
            // entity names are short; a far-away ';' means a bare '&'
            Some(semi) if semi > 1 && semi <= 10 => {
                let name = &tail[1..semi];
                match name {
                    "lt" => out.push('<'),
                    "gt" => out.push('>'),
                    "amp" => out.push('&'),
                    "apos" => out.push('\''),
                    "quot" => out.push('"'),
                    _ if name.starts_with('#') => match decode_char_ref(&name[1..]) {
                        Some(c) => out.push(c),
                        None => out.push_str(&tail[..=semi]),
                    },
                    _ => {
                        if unknown.is_none() {
                            unknown = Some(name.to_string());
                        }
                        out.push_str(&tail[..=semi]);
                    }
                }
                rest = &tail[semi + 1..];
            }
            _ => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    (out, unknown)
}

fn decode_char_ref(digits: &str) -> Option<char> {
    let code = if let Some(hex) = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<u32>().ok()?
    };
    char::from_u32(code)
}

/// Escape text content for serialization.
pub fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            _ => out.push(c),
        }
    }
}

/// Escape an attribute value for serialization inside double quotes.
pub fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_predefined() {
        let (s, unknown) = decode_entities("a &lt;b&gt; &amp; c");
        assert_eq!(s, "a <b> & c");
        assert!(unknown.is_none());
    }

    #[test]
    fn test_decode_char_refs() {
        let (s, _) = decode_entities("&#65;&#x42;");
        assert_eq!(s, "AB");
    }

    #[test]
    fn test_unknown_entity_reported() {
        let (s, unknown) = decode_entities("x &foo; y");
        assert_eq!(s, "x &foo; y");
        assert_eq!(unknown.as_deref(), Some("foo"));
    }

    #[test]
    fn test_bare_ampersand_kept() {
        let (s, unknown) = decode_entities("fish & chips");
        assert_eq!(s, "fish & chips");
        assert!(unknown.is_none());
    }

    #[test]
    fn test_escape_attr() {
        let mut out = String::new();
        escape_attr("a \"b\" <c> & d", &mut out);
        assert_eq!(out, "a &quot;b&quot; &lt;c> &amp; d");
    }
}
