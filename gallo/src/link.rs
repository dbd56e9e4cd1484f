use tokio::sync::mpsc;

/// An open byte pipe to a board.
///
/// Outgoing chunks each hold one or more encoded frames. Incoming chunks
/// may split or merge frames arbitrarily; the receiver reassembles them.
/// The board is gone once the incoming side yields `None`.
#[derive(Debug)]
pub struct Link {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Link {
    pub fn new(tx: mpsc::Sender<Vec<u8>>, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { tx, rx }
    }

    /// Two links connected back to back: what one sends the other receives.
    pub fn pair(depth: usize) -> (Link, Link) {
        let (a_tx, b_rx) = mpsc::channel(depth);
        let (b_tx, a_rx) = mpsc::channel(depth);
        (Link::new(a_tx, a_rx), Link::new(b_tx, b_rx))
    }

    pub async fn send(&self, chunk: Vec<u8>) -> bool {
        self.tx.send(chunk).await.is_ok()
    }

    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    pub fn into_parts(self) -> (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
        (self.tx, self.rx)
    }
}
