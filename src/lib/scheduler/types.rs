/// Cyclic, order-based worker selection. Placement ignores load entirely;
/// ties are broken by list order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundRobin {
    pub last_worker: usize,
}

impl RoundRobin {
    pub fn new(last_worker: usize) -> Self {
        RoundRobin { last_worker }
    }
}
