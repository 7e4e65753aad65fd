//! Splits free-text solutions into ordered steps.

use std::sync::LazyLock;

use regex::Regex;

/// `Step 3:` / `step 3.` / `Step 3 -` anywhere in a line.
static STEP_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bstep\s+\d+\s*[:.)\-]\s*").expect("step marker regex is valid")
});

/// `1.` / `2)` at line start, followed by whitespace.
static NUMBERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[.)]\s+").expect("numbered list regex is valid"));

/// `-`, `*` or `•` bullets at line start.
static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*•]\s+").expect("bullet regex is valid"));

/// Decomposes a solution into steps.
///
/// Recognises `Step N:` markers (several may share a line), numbered lists
/// and bullets. Continuation lines join the current step and text before
/// the first marker becomes its own step. Text without any structure is a
/// single step; blank text yields no steps.
///
/// # Examples
///
/// ```
/// use mathroute::router::decompose_steps;
///
/// let steps = decompose_steps("Step 1: factor. Step 2: solve each factor.");
/// assert_eq!(steps, vec!["factor.", "solve each factor."]);
/// ```
pub fn decompose_steps(text: &str) -> Vec<String> {
    let mut steps: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut structured = false;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if STEP_MARKER_RE.is_match(line) {
            structured = true;
            let mut last = 0;
            for marker in STEP_MARKER_RE.find_iter(line) {
                append(&mut current, &line[last..marker.start()]);
                flush(&mut current, &mut steps);
                last = marker.end();
            }
            append(&mut current, &line[last..]);
            continue;
        }

        let list_item = NUMBERED_RE.find(line).or_else(|| BULLET_RE.find(line));
        if let Some(item) = list_item {
            structured = true;
            flush(&mut current, &mut steps);
            append(&mut current, &line[item.end()..]);
            continue;
        }

        append(&mut current, line);
    }
    flush(&mut current, &mut steps);

    if !structured && !steps.is_empty() {
        return vec![text.trim().to_string()];
    }
    steps
}

fn flush(current: &mut String, steps: &mut Vec<String>) {
    let step = current.trim();
    if !step.is_empty() {
        steps.push(step.to_string());
    }
    current.clear();
}

fn append(current: &mut String, fragment: &str) {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return;
    }
    if !current.is_empty() {
        current.push(' ');
    }
    current.push_str(fragment);
}
