use crate::event::{InputEvent, KeyState, OutputEvent};

/// The per-key counting stage.
///
/// Every event it sees counts exactly once against its key; `version` rides
/// along untouched. Keying, ordering and state durability belong to the
/// caller, which is what makes the counts exact under replay: the worker
/// only hands this processor records the current checkpoint epoch has not
/// counted yet.
#[derive(Debug, Clone, Default)]
pub struct TallyProcessor;

impl TallyProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Count one event and derive the records to emit for it.
    pub fn process(&self, event: &InputEvent, state: &mut KeyState) -> Vec<OutputEvent> {
        state.count += 1;
        vec![OutputEvent {
            id: event.id.clone(),
            version: event.version,
            count: state.count,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, version: i64) -> InputEvent {
        InputEvent {
            id: id.to_string(),
            version,
        }
    }

    #[test]
    fn counts_every_event_once() {
        let processor = TallyProcessor::new();
        let mut state = KeyState::new("user-1".to_string());

        for expected in 1..=3 {
            let outputs = processor.process(&event("user-1", expected), &mut state);
            assert_eq!(outputs.len(), 1);
            assert_eq!(outputs[0].count, expected);
        }

        assert_eq!(state.count, 3);
    }

    #[test]
    fn version_is_carried_through_not_deduplicated() {
        let processor = TallyProcessor::new();
        let mut state = KeyState::new("user-1".to_string());

        // The same version twice still counts twice.
        let first = processor.process(&event("user-1", 7), &mut state);
        let second = processor.process(&event("user-1", 7), &mut state);

        assert_eq!(first[0].version, 7);
        assert_eq!(second[0].version, 7);
        assert_eq!(second[0].count, 2);
    }

    #[test]
    fn keys_do_not_share_counts() {
        let processor = TallyProcessor::new();
        let mut a = KeyState::new("a".to_string());
        let mut b = KeyState::new("b".to_string());

        processor.process(&event("a", 1), &mut a);
        processor.process(&event("a", 2), &mut a);
        processor.process(&event("b", 1), &mut b);

        assert_eq!(a.count, 2);
        assert_eq!(b.count, 1);
    }
}
