//! Question/answer I/O for interactive account setup.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

pub trait Prompt: Send {
    /// Show `question` and return the trimmed answer.
    fn ask(&mut self, question: &str) -> io::Result<String>;
    /// Show an informational line.
    fn say(&mut self, line: &str);
}

/// Plain terminal I/O on stdin/stdout.
#[derive(Debug, Default)]
pub struct Terminal;

impl Prompt for Terminal {
    fn ask(&mut self, question: &str) -> io::Result<String> {
        let mut stdout = io::stdout();
        write!(stdout, "{question}")?;
        stdout.flush()?;
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed"));
        }
        Ok(answer.trim().to_string())
    }

    fn say(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Replays canned answers. Running out of answers behaves like EOF.
#[derive(Debug, Default)]
pub struct Scripted {
    answers: VecDeque<String>,
    /// Every question and line shown, in order.
    pub transcript: Vec<String>,
}

impl Scripted {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            transcript: Vec::new(),
        }
    }
}

impl Prompt for Scripted {
    fn ask(&mut self, question: &str) -> io::Result<String> {
        self.transcript.push(question.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no more answers"))
    }

    fn say(&mut self, line: &str) {
        self.transcript.push(line.to_string());
    }
}
