/// Accumulates raw output bytes and yields complete `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    data: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Next complete line in arrival order, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let newline = self.data.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.data.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Bytes of the trailing partial line still waiting for a newline.
    pub fn pending(&self) -> usize {
        self.data.len()
    }

    /// Drops the trailing partial line, returning how many bytes were lost.
    pub fn discard_partial(&mut self) -> usize {
        let len = self.data.len();
        self.data.clear();
        len
    }
}
