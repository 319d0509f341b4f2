use std::io::Write;

use crate::error::ProbeError;
use crate::sampler::Reading;

/// Destination for readings.
pub trait ReadingWriter {
    fn write_reading(&mut self, reading: &Reading) -> Result<(), ProbeError>;
}

/// Writes one reading per line and flushes after each, so a consumer
/// tailing the stream sees every reading as soon as it exists.
#[derive(Debug)]
pub struct LineWriter<W: Write> {
    inner: W,
}

impl<W: Write> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> ReadingWriter for LineWriter<W> {
    fn write_reading(&mut self, reading: &Reading) -> Result<(), ProbeError> {
        writeln!(self.inner, "{reading}").map_err(ProbeError::Output)?;
        self.inner.flush().map_err(ProbeError::Output)
    }
}
