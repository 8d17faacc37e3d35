use ndarray::{Array1, Array2};
/// Handler invoked with the time axis and the data of each newly appended block.
pub type DataReadyCallback = Box<dyn FnMut(&Array1<f64>, &Array2<f64>) + Send>;
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);
/// Ordered set of data-ready handlers, notified in subscription order.
#[derive(Default)]
pub struct DataReadyListeners {
    next_id: u64,
    listeners: Vec<(ListenerId, DataReadyCallback)>,
}
impl DataReadyListeners {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn subscribe(&mut self, callback: DataReadyCallback) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, callback));
        id
    }
    /// Returns `false` when `id` was not (or no longer) subscribed.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }
    pub fn clear(&mut self) {
        self.listeners.clear();
    }
    pub fn len(&self) -> usize {
        self.listeners.len()
    }
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
    pub fn notify(&mut self, time: &Array1<f64>, data: &Array2<f64>) {
        for (_, callback) in &mut self.listeners {
            callback(time, data);
        }
    }
}
