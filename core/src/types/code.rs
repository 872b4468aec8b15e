use std::fmt::Display;

/// Generated T-SQL, assembled clause by clause and sent verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Code(String);

impl From<String> for Code {
    fn from(value: String) -> Self {
        Code(value)
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Code {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Code {
    pub fn new(value: String) -> Self {
        Code(value)
    }

    pub fn blank() -> Self {
        Code(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Starts a new line unless the text is still empty.
    pub fn push_line(&mut self, line: &str) {
        if !self.0.is_empty() {
            self.0.push('\n');
        }
        self.0.push_str(line);
    }

    /// Closes the statement with `;`, once.
    pub fn terminate(&mut self) {
        if !self.0.trim_end().ends_with(';') {
            self.0.push(';');
        }
    }
}
