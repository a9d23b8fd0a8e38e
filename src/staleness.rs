use std::collections::HashMap;

/// User-navigable views whose responses can race each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum View {
    Chart,
    SwingPoints,
}

/// Token carried by one view request. Only the latest issued token per view is current.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ViewToken(pub u64);

#[derive(Debug, Default)]
pub struct StalenessGuard {
    counters: HashMap<View, u64>,
}

impl StalenessGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next token for `view`. Tokens start at 1 and are never reused.
    pub fn begin_request(&mut self, view: View) -> ViewToken {
        let c = self.counters.entry(view).or_insert(0);
        *c = c.saturating_add(1);
        ViewToken(*c)
    }

    pub fn is_current(&self, view: View, token: ViewToken) -> bool {
        self.counters.get(&view).copied() == Some(token.0)
    }
}
