//! Control-description parser.
//!
//! Parses the line-oriented control description of a question into the
//! buttons and optional input the interaction page renders. The parser is
//! total: any input yields a valid (possibly empty) description, and
//! unrecognized lines are silently ignored.
//!
//! Recognized syntax:
//!
//! ```text
//! :::buttons
//! - [Approve](approve)
//! - [Reject](reject)
//! :::
//! :::input name="note" label="Note" submit="Send"
//! :::
//! ```

use std::sync::LazyLock;

use regex::Regex;

static RE_BUTTONS_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*:::\s*buttons\s*$").expect("buttons-start regex"));
static RE_INPUT_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*:::\s*input\b(.*)$").expect("input-start regex"));
static RE_BLOCK_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*:::\s*$").expect("block-end regex"));
static RE_BUTTON_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*-\s*\[(.*?)\]\((.*?)\)\s*$").expect("button-line regex"));
static RE_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)\s*=\s*"([^"]*)""#).expect("attr regex"));

/// A single button: `- [label](value)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonSpec {
    pub label: String,
    pub value: String,
}

/// The optional free-text input.
///
/// `name` is parsed and preserved, but submissions currently arrive under
/// the fixed form field `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub name: String,
    pub label: String,
    pub submit: String,
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            name: "text".to_string(),
            label: "Text".to_string(),
            submit: "Send".to_string(),
        }
    }
}

/// Parsed control description: ordered buttons plus at most one input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlSpec {
    pub buttons: Vec<ButtonSpec>,
    pub input: Option<InputSpec>,
}

/// Parses a control description.
///
/// Multiple buttons blocks accumulate; of multiple input lines, the last
/// one wins.
#[must_use]
pub fn parse(source: &str) -> ControlSpec {
    let mut spec = ControlSpec::default();
    let mut in_buttons = false;

    for line in source.split('\n') {
        if in_buttons {
            if RE_BLOCK_END.is_match(line) {
                in_buttons = false;
                continue;
            }
            if let Some(caps) = RE_BUTTON_LINE.captures(line) {
                let label = caps[1].trim();
                let value = caps[2].trim();
                if !label.is_empty() && !value.is_empty() {
                    spec.buttons.push(ButtonSpec {
                        label: label.to_string(),
                        value: value.to_string(),
                    });
                }
            }
            continue;
        }

        if RE_BUTTONS_START.is_match(line) {
            in_buttons = true;
            continue;
        }

        if let Some(caps) = RE_INPUT_START.captures(line) {
            let mut input = InputSpec::default();
            for attr in RE_ATTR.captures_iter(&caps[1]) {
                let value = &attr[2];
                if value.trim().is_empty() {
                    continue;
                }
                match attr[1].to_lowercase().as_str() {
                    "name" => input.name = value.to_string(),
                    "label" => input.label = value.to_string(),
                    "submit" => input.submit = value.to_string(),
                    _ => {}
                }
            }
            spec.input = Some(input);
        }
    }

    spec
}
