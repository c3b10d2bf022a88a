use std::fmt;

/// Wraps a byte slice so `Debug` prints it as escaped ASCII text rather
/// than a list of integers.
pub(crate) struct Bytes<B>(pub B);

impl<B: AsRef<[u8]>> fmt::Debug for Bytes<B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"")?;
        for byte in self.0.as_ref().iter().copied() {
            for escaped in std::ascii::escape_default(byte) {
                write!(f, "{}", escaped as char)?;
            }
        }
        write!(f, "\"")
    }
}
