//! Completed tasks in arrival order

use std::collections::VecDeque;
use std::sync::Arc;

use crate::nag::Nag;

#[derive(Debug, Default)]
pub struct ResultInbox {
    entries: VecDeque<Arc<Nag>>,
}

impl ResultInbox {
    pub fn push(&mut self, nag: Arc<Nag>) {
        self.entries.push_back(nag);
    }

    /// Removes and returns the earliest entry matching `pred`. Entries before it
    /// stay where they are.
    pub fn take_first<F>(&mut self, mut pred: F) -> Option<Arc<Nag>>
    where
        F: FnMut(&Nag) -> bool,
    {
        let index = self.entries.iter().position(|nag| pred(nag))?;
        self.entries.remove(index)
    }

    /// Returns the number of entries removed.
    pub fn remove_where<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&Nag) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|nag| !pred(nag));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nag::{OrderingSeed, test_template};

    #[test]
    fn test_take_first_skips_but_keeps_others() {
        let seed = OrderingSeed::new(5).unwrap();
        let old = Arc::new(Nag::from_template(&test_template(3), seed));
        let a = Arc::new(Nag::from_template(&test_template(4), seed));
        let b = Arc::new(Nag::from_template(&test_template(4), seed));

        let mut inbox = ResultInbox::default();
        inbox.push(old.clone());
        inbox.push(a.clone());
        inbox.push(b.clone());

        let got = inbox.take_first(|nag| nag.start_depth() == 4).unwrap();
        assert_eq!(got.id(), a.id());
        assert_eq!(inbox.len(), 2);

        assert_eq!(inbox.remove_where(|nag| nag.start_depth() == 3), 1);
        assert_eq!(inbox.take_first(|_| true).map(|n| n.id()), Some(b.id()));
        assert!(inbox.is_empty());
    }
}
