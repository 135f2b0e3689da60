/// Strict parser for the perception backend's element listing.
///
/// Each line looks like `icon 3: {'type': 'text', 'bbox': [0.1, 0.2, 0.3, 0.4],
/// 'interactivity': False, 'content': 'Save'}`. The dict body is a
/// Python-literal subset: dicts, lists, single- or double-quoted strings with
/// backslash escapes, numbers, `True`, `False` and `None`. Nothing else is
/// accepted; the body is never evaluated.
use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Number, Value};

use crate::errors::{BubbleError, BubbleResult};
use crate::perception::types::{BBox, UIElement};

fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*icon\s+(\d+)\s*:\s*(\{.*\})\s*$").expect("static regex"))
}

/// Parse a full listing. Lines that are not element lines are skipped;
/// element lines with an unparseable body or an invalid bbox are dropped with a warning.
pub fn parse_listing(listing: &str) -> Vec<UIElement> {
    let mut seen = HashSet::new();
    let mut elements = Vec::new();

    for (line_no, line) in listing.lines().enumerate() {
        let Some(caps) = line_regex().captures(line) else {
            if !line.trim().is_empty() {
                tracing::debug!(line_no, "skipping non-element line");
            }
            continue;
        };
        let id: u32 = match caps[1].parse() {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(line_no, error = %e, "element id out of range");
                continue;
            }
        };
        match parse_element(id, &caps[2]) {
            Ok(element) => {
                if !seen.insert(element.id) {
                    tracing::warn!(id, "duplicate element id, keeping first occurrence");
                    continue;
                }
                elements.push(element);
            }
            Err(e) => tracing::warn!(id, error = %e, "dropping malformed element"),
        }
    }
    elements
}

fn parse_element(id: u32, body: &str) -> BubbleResult<UIElement> {
    let value = parse_literal(body)?;
    let Value::Object(map) = value else {
        return Err(BubbleError::PerceptionResponse("element body is not a dict".into()));
    };

    let coords: Vec<f64> = map
        .get("bbox")
        .and_then(Value::as_array)
        .ok_or_else(|| BubbleError::PerceptionResponse("element has no bbox list".into()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| BubbleError::PerceptionResponse("non-numeric bbox value".into()))
        })
        .collect::<BubbleResult<_>>()?;
    let bbox = BBox::from_slice(&coords)?;

    Ok(UIElement {
        id,
        element_type: map
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        bbox,
        content: map.get("content").and_then(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }),
        interactivity: map.get("interactivity").and_then(Value::as_bool),
    })
}

/// Parse one Python-literal value into JSON.
pub fn parse_literal(input: &str) -> BubbleResult<Value> {
    let mut parser = LiteralParser {
        chars: input.chars().collect(),
        pos: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(value)
}

struct LiteralParser {
    chars: Vec<char>,
    pos: usize,
}

impl LiteralParser {
    fn error(&self, what: &str) -> BubbleError {
        BubbleError::PerceptionResponse(format!("{what} at offset {}", self.pos))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, ch: char) -> BubbleResult<()> {
        self.skip_ws();
        if self.peek() == Some(ch) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{ch}'")))
        }
    }

    fn value(&mut self) -> BubbleResult<Value> {
        self.skip_ws();
        match self.peek() {
            Some('{') => self.dict(),
            Some('[') => self.sequence('[', ']'),
            Some('(') => self.sequence('(', ')'),
            Some('\'') | Some('"') => self.string().map(Value::String),
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.keyword(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn dict(&mut self) -> BubbleResult<Value> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }
            let key = match self.peek() {
                Some('\'') | Some('"') => self.string()?,
                _ => return Err(self.error("dict keys must be strings")),
            };
            self.expect(':')?;
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {}
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn sequence(&mut self, open: char, close: char) -> BubbleResult<Value> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(Value::Array(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(c) if c == close => {}
                _ => return Err(self.error("expected ',' or closing bracket")),
            }
        }
    }

    fn string(&mut self) -> BubbleResult<String> {
        let Some(quote) = self.peek() else {
            return Err(self.error("expected string"));
        };
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unterminated string"));
            };
            self.pos += 1;
            if c == quote {
                return Ok(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let Some(esc) = self.peek() else {
                return Err(self.error("dangling escape"));
            };
            self.pos += 1;
            match esc {
                '\\' => out.push('\\'),
                '\'' => out.push('\''),
                '"' => out.push('"'),
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'x' => out.push(self.hex_escape(2)?),
                'u' => out.push(self.hex_escape(4)?),
                'U' => out.push(self.hex_escape(8)?),
                _ => return Err(self.error("unsupported escape")),
            }
        }
    }

    fn hex_escape(&mut self, len: usize) -> BubbleResult<char> {
        if self.pos + len > self.chars.len() {
            return Err(self.error("short hex escape"));
        }
        let digits: String = self.chars[self.pos..self.pos + len].iter().collect();
        self.pos += len;
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("invalid hex escape"))
    }

    fn number(&mut self) -> BubbleResult<Value> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Value::Number(Number::from(i)));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| self.error("invalid number"))
    }

    fn keyword(&mut self) -> BubbleResult<Value> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::Null),
            _ => {
                self.pos = start;
                Err(self.error("identifiers are not allowed"))
            }
        }
    }
}
