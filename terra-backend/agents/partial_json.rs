//! Read string fields out of a JSON object that is still being generated.
//!
//! The agent streams its structured answer as raw JSON text. Until the object
//! is complete `serde_json` cannot parse it, yet the `summary` field is useful
//! as soon as its first characters arrive.

/// Decoded value of the top-level `field`, as far as it has been produced.
///
/// Returns `None` until the opening quote of the value has been seen, or when
/// the value is not a string.
pub fn partial_string_field(buf: &str, field: &str) -> Option<String> {
    let chars: Vec<char> = buf.chars().collect();
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' | '[' => {
                depth += 1;
                i += 1;
            }
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                i += 1;
            }
            '"' => {
                let (key, end, complete) = read_string(&chars, i + 1);
                if !complete {
                    return None;
                }
                i = end;
                if depth != 1 {
                    continue;
                }
                let after_key = skip_ws(&chars, i);
                if chars.get(after_key) != Some(&':') {
                    continue;
                }
                i = skip_ws(&chars, after_key + 1);
                if key != field {
                    continue;
                }
                return match chars.get(i) {
                    Some('"') => Some(read_string(&chars, i + 1).0),
                    _ => None,
                };
            }
            _ => i += 1,
        }
    }
    None
}

pub fn partial_summary(buf: &str) -> Option<String> {
    partial_string_field(buf, "summary")
}

fn skip_ws(chars: &[char], mut i: usize) -> usize {
    while chars.get(i).is_some_and(|c| c.is_whitespace()) {
        i += 1;
    }
    i
}

/// Decode a string body starting just after its opening quote.
/// Returns the text, the index after the closing quote, and whether the
/// closing quote was reached. An escape cut off by the end of input is dropped.
fn read_string(chars: &[char], start: usize) -> (String, usize, bool) {
    let mut out = String::new();
    let mut i = start;

    while i < chars.len() {
        match chars[i] {
            '"' => return (out, i + 1, true),
            '\\' => {
                let Some(&esc) = chars.get(i + 1) else {
                    return (out, chars.len(), false);
                };
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    'u' => {
                        let Some((c, consumed)) = read_unicode_escape(chars, i) else {
                            return (out, chars.len(), false);
                        };
                        out.push(c);
                        i += consumed;
                        continue;
                    }
                    other => out.push(other),
                }
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    (out, chars.len(), false)
}

fn hex4(chars: &[char], at: usize) -> Option<u32> {
    let digits: String = chars.get(at..at + 4)?.iter().collect();
    u32::from_str_radix(&digits, 16).ok()
}

/// Decode `\uXXXX` (and a following low surrogate) at `i`. Returns the char and
/// how many input chars were consumed, or `None` if the input is truncated.
fn read_unicode_escape(chars: &[char], i: usize) -> Option<(char, usize)> {
    let high = hex4(chars, i + 2)?;
    if (0xD800..0xDC00).contains(&high) {
        if chars.get(i + 6) != Some(&'\\') || chars.get(i + 7) != Some(&'u') {
            if i + 8 > chars.len() {
                return None;
            }
            return Some((char::REPLACEMENT_CHARACTER, 6));
        }
        let low = hex4(chars, i + 8)?;
        let code = 0x10000 + ((high - 0xD800) << 10) + (low.wrapping_sub(0xDC00) & 0x3FF);
        return Some((char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER), 12));
    }
    Some((char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER), 6))
}
