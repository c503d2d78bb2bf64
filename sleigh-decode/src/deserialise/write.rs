use std::fmt::{Display, Write};

/// Minimal streaming writer for the compiled specification format.
///
/// Elements are opened with [`XmlWriter::start`], decorated with attributes
/// and closed with [`XmlWriter::end`]; elements without children are emitted
/// in their self-closing form.
#[derive(Debug, Default)]
pub struct XmlWriter {
    out: String,
    stack: Vec<&'static str>,
    open: bool,
}

impl XmlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn seal(&mut self) {
        if self.open {
            self.out.push('>');
            self.open = false;
        }
    }

    pub fn start(&mut self, tag: &'static str) -> &mut Self {
        self.seal();
        self.out.push('<');
        self.out.push_str(tag);
        self.stack.push(tag);
        self.open = true;
        self
    }

    pub fn attr<T: Display>(&mut self, name: &str, value: T) -> &mut Self {
        let value = value.to_string();
        let _ = write!(self.out, " {}=\"", name);
        for c in value.chars() {
            match c {
                '&' => self.out.push_str("&amp;"),
                '<' => self.out.push_str("&lt;"),
                '>' => self.out.push_str("&gt;"),
                '"' => self.out.push_str("&quot;"),
                '\n' => self.out.push_str("&#10;"),
                '\t' => self.out.push_str("&#9;"),
                c => self.out.push(c),
            }
        }
        self.out.push('"');
        self
    }

    pub fn attr_hex(&mut self, name: &str, value: u64) -> &mut Self {
        self.attr(name, format_args!("{:#x}", value))
    }

    pub fn end(&mut self) -> &mut Self {
        if let Some(tag) = self.stack.pop() {
            if self.open {
                self.out.push_str("/>");
                self.open = false;
            } else {
                let _ = write!(self.out, "</{}>", tag);
            }
            if self.stack.is_empty() {
                self.out.push('\n');
            }
        }
        self
    }

    pub fn empty(&mut self, tag: &'static str) -> &mut Self {
        self.start(tag).end()
    }

    pub fn finish(mut self) -> String {
        while !self.stack.is_empty() {
            self.end();
        }
        self.out
    }
}
