//! Line-oriented human interaction over any reader/writer pair.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

pub struct Console<R, W> {
    input: R,
    output: W,
}

/// Console bound to the process's stdin/stdout.
pub fn stdio() -> Console<io::StdinLock<'static>, io::Stdout> {
    Console::new(io::stdin().lock(), io::stdout())
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Print one block of text followed by a newline.
    pub fn say(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{text}").context("write to console")?;
        self.output.flush().context("flush console")
    }

    /// Ask a question and read one trimmed line. `None` on end of input.
    pub fn prompt(&mut self, question: &str) -> Result<Option<String>> {
        write!(self.output, "{question} ").context("write to console")?;
        self.output.flush().context("flush console")?;
        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("read from console")?;
        if read == 0 {
            writeln!(self.output).context("write to console")?;
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    /// Re-ask until `parse` accepts the answer, printing `hint` after each
    /// rejected one. `None` on end of input.
    pub fn choose<T>(
        &mut self,
        question: &str,
        hint: &str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<Option<T>> {
        loop {
            let Some(answer) = self.prompt(question)? else {
                return Ok(None);
            };
            if let Some(choice) = parse(&answer.to_ascii_lowercase()) {
                return Ok(Some(choice));
            }
            self.say(hint)?;
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }
}
