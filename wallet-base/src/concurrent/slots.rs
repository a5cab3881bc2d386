use std::iter;

/// Index-keyed outputs of one map call, pre-sized to the input length. Keying by index instead
/// of by input value keeps one output per input even when inputs repeat.
pub(crate) struct ResultSlots<O> {
    slots: Vec<Option<O>>,
    filled: usize,
}

impl<O> ResultSlots<O> {
    pub(crate) fn with_len(len: usize) -> Self {
        Self {
            slots: iter::repeat_with(|| None).take(len).collect(),
            filled: 0,
        }
    }

    /// Records the output of the task at `index`. Each index is filled at most once.
    pub(crate) fn fill(&mut self, index: usize, output: O) {
        let slot = self
            .slots
            .get_mut(index)
            .unwrap_or_else(|| panic!("task index {index} is outside of the input"));
        let previous = slot.replace(output);
        debug_assert!(previous.is_none(), "task index {index} reported twice");
        self.filled += 1;
    }

    pub(crate) fn filled(&self) -> usize {
        self.filled
    }

    /// Outputs in input order, or `None` if any slot is still empty.
    pub(crate) fn into_ordered(self) -> Option<Vec<O>> {
        self.slots.into_iter().collect()
    }
}
