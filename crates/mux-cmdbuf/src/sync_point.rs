use crate::error::{CommandBufferError, Result};

/// `cl_sync_point_khr`: names the completion of one recorded command within its command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncPointId(u32);

impl SyncPointId {
    /// Wraps a raw id received from the caller. Validity is checked when it is used.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SyncPointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dependency graph over recorded commands.
///
/// Nodes are command indices in recording order. A command may only depend on commands recorded
/// before it, so recording order is always a valid topological order.
#[derive(Debug, Clone)]
pub struct SyncPointGraph {
    /// Command index producing each sync point, indexed by sync point id.
    producers: Vec<usize>,
    /// Dependencies of each command, sorted and deduplicated.
    dependencies: Vec<Vec<usize>>,
    /// Whether some later command depends on the command.
    has_dependents: Vec<bool>,
    /// Sync point ids are 32-bit; at most this many can be produced.
    capacity: usize,
}

impl Default for SyncPointGraph {
    fn default() -> Self {
        Self {
            producers: Vec::new(),
            dependencies: Vec::new(),
            has_dependents: Vec::new(),
            capacity: u32::MAX as usize,
        }
    }
}

impl SyncPointGraph {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// The id the next produced sync point will get; also the number produced so far.
    pub fn next_sync_point(&self) -> u32 {
        // `capacity` keeps the count within `u32`.
        u32::try_from(self.producers.len()).unwrap_or(u32::MAX)
    }

    /// Fails when producing another sync point would overflow the 32-bit id space.
    pub fn check_capacity(&self, produce: bool) -> Result<()> {
        if produce && self.producers.len() >= self.capacity {
            return Err(CommandBufferError::SyncPointsExhausted);
        }
        Ok(())
    }

    /// Rejects any id that was not produced by an earlier append.
    pub fn check_wait_list(&self, wait_list: &[SyncPointId]) -> Result<()> {
        let next = self.next_sync_point();
        match wait_list.iter().find(|sp| sp.get() >= next) {
            Some(&sync_point) => Err(CommandBufferError::InvalidSyncPoint { sync_point, next }),
            None => Ok(()),
        }
    }

    /// Command indices named by a validated wait list.
    pub fn resolve(&self, wait_list: &[SyncPointId]) -> Vec<usize> {
        let mut deps: Vec<usize> = wait_list
            .iter()
            .filter_map(|sp| self.producers.get(sp.get() as usize).copied())
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }

    /// Commands nothing depends on yet. Depending on all of them transitively orders after
    /// every recorded command.
    pub fn sinks(&self) -> Vec<usize> {
        self.has_dependents
            .iter()
            .enumerate()
            .filter(|(_, has)| !**has)
            .map(|(i, _)| i)
            .collect()
    }

    /// Records a command with the given dependencies, optionally producing a sync point.
    /// Callers check [`SyncPointGraph::check_capacity`] first.
    pub fn push(&mut self, dependencies: Vec<usize>, produce: bool) -> (usize, Option<SyncPointId>) {
        let index = self.dependencies.len();
        for &dep in &dependencies {
            if let Some(has) = self.has_dependents.get_mut(dep) {
                *has = true;
            }
        }
        self.dependencies.push(dependencies);
        self.has_dependents.push(false);

        let sync_point = produce.then(|| {
            let id = SyncPointId(self.next_sync_point());
            self.producers.push(index);
            id
        });
        (index, sync_point)
    }

    pub fn dependencies(&self, command: usize) -> &[usize] {
        self.dependencies
            .get(command)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_allocated_only_on_request() {
        let mut graph = SyncPointGraph::new();
        let (a, sa) = graph.push(Vec::new(), false);
        let (b, sb) = graph.push(Vec::new(), true);
        let (_, sc) = graph.push(Vec::new(), true);
        assert_eq!((a, b), (0, 1));
        assert_eq!(sa, None);
        assert_eq!(sb, Some(SyncPointId::new(0)));
        assert_eq!(sc, Some(SyncPointId::new(1)));
        assert_eq!(graph.next_sync_point(), 2);
        assert_eq!(graph.resolve(&[SyncPointId::new(1), SyncPointId::new(0)]), vec![1, 2]);
    }

    #[test]
    fn sync_point_ids_stop_at_capacity() {
        let mut graph = SyncPointGraph::with_capacity_limit(2);
        graph.push(Vec::new(), true);
        graph.push(Vec::new(), true);
        assert_eq!(
            graph.check_capacity(true).unwrap_err(),
            CommandBufferError::SyncPointsExhausted
        );
        assert_eq!(
            graph.check_capacity(true).unwrap_err().status(),
            mux_hal::Status::OutOfResources
        );
        // Commands that produce nothing can still be recorded.
        graph.check_capacity(false).unwrap();
        graph.push(vec![1], false);
        assert_eq!(graph.next_sync_point(), 2);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn forward_ids_are_rejected() {
        let mut graph = SyncPointGraph::new();
        assert!(graph.check_wait_list(&[SyncPointId::new(0)]).is_err());
        graph.push(Vec::new(), true);
        graph.check_wait_list(&[SyncPointId::new(0)]).unwrap();
        assert_eq!(
            graph.check_wait_list(&[SyncPointId::new(1)]).unwrap_err(),
            CommandBufferError::InvalidSyncPoint {
                sync_point: SyncPointId::new(1),
                next: 1
            }
        );
    }

    #[test]
    fn sinks_track_commands_without_dependents() {
        let mut graph = SyncPointGraph::new();
        graph.push(Vec::new(), true);
        graph.push(Vec::new(), true);
        graph.push(vec![0], false);
        assert_eq!(graph.sinks(), vec![1, 2]);

        let sinks = graph.sinks();
        graph.push(sinks, false);
        assert_eq!(graph.sinks(), vec![3]);
        assert_eq!(graph.dependencies(3), &[1, 2]);
    }
}
