/// What a confirm keypress in the text entry should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnterAction {
    /// Submit the draft with one trailing line break removed.
    Submit(String),
    InsertNewline,
    Ignore,
}

pub fn can_send(draft: &str, busy: bool) -> bool {
    !busy && !draft.trim().is_empty()
}

/// Plain Enter submits; Shift+Enter inserts a literal line break.
pub fn enter_action(draft: &str, shift: bool, busy: bool) -> EnterAction {
    if shift {
        return if busy {
            EnterAction::Ignore
        } else {
            EnterAction::InsertNewline
        };
    }

    // Some inputs have already inserted the line break by the time Enter is reported.
    let draft = draft.strip_suffix('\n').unwrap_or(draft);
    if can_send(draft, busy) {
        EnterAction::Submit(draft.to_string())
    } else {
        EnterAction::Ignore
    }
}
