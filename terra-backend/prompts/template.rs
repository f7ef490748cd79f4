use std::collections::HashMap;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

fn is_slot_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

enum Segment<'t> {
    Text(&'t str),
    Slot { name: &'t str, raw: &'t str },
}

/// Split `template` into literal text and `{{NAME}}` slots.
fn segments(template: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(len) = after_open.find(CLOSE) else {
            break;
        };
        let name = after_open[..len].trim();
        let raw = &rest[start..start + OPEN.len() + len + CLOSE.len()];

        out.push(Segment::Text(&rest[..start]));
        if is_slot_name(name) {
            out.push(Segment::Slot { name, raw });
        } else {
            out.push(Segment::Text(raw));
        }
        rest = &after_open[len + CLOSE.len()..];
    }
    out.push(Segment::Text(rest));
    out
}

/// Substitute known slots in one pass. Unknown slots are left intact, and
/// substituted values are never re-scanned.
pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    for segment in segments(template) {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Slot { name, raw } => out.push_str(vars.get(name).map_or(raw, String::as_str)),
        }
    }
    out
}

/// Every slot name in `template`, in order of appearance, without duplicates.
pub fn slots(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for segment in segments(template) {
        if let Segment::Slot { name, .. } = segment {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Slots that `render(template, vars)` would leave unresolved.
pub fn missing_slots(template: &str, vars: &HashMap<String, String>) -> Vec<String> {
    slots(template)
        .into_iter()
        .filter(|name| !vars.contains_key(name))
        .collect()
}
