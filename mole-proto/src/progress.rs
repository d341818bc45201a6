/// The answer of a stage parser after looking at the bytes buffered so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress<T> {
    /// Not enough bytes yet. Holds the total amount of buffered bytes (counted from the start of
    /// the unit being parsed) needed before the parser can make progress.
    Incomplete(usize),

    /// The unit is fully buffered.
    Complete(T),
}
