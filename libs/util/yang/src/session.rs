// This file is part of Ember.
//
// Ember is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Ember is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Ember.  If not, see <http://www.gnu.org/licenses/>.

//! Per-parse state: collected diagnostics. Threading this value through
//! the lexer and parser keeps a compile free of shared state, so
//! programs can be compiled back to back without any reset step.

use log::error;

#[derive(Debug, Default)]
pub struct ParseSession {
    errors: Vec<String>,
}

impl ParseSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: String) {
        error!("{}", message);
        self.errors.push(message);
    }

    pub fn into_errors(self) -> Vec<String> {
        self.errors
    }
}

/// Diagnostic formatting shared by the lexer, parser and checker. The
/// token text is flattened so multi-line tokens don't mangle the message.
pub fn format_error(line: usize, token: &str, message: &str) -> String {
    let mut line = line;
    let mut text = token.to_owned();
    if text.contains('\n') || text.contains('\r') {
        text = text.replace('\n', "").replace('\r', "");
        line = line.saturating_sub(1);
    }
    text = text.replace('\t', " ");

    format!("Error at line {}, near `{}`:\n\t{}", line, text, message)
}
