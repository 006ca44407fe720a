use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends every event, logging the ones that could not be delivered.
    pub async fn send_all(&self, events: Vec<Event>) {
        for event in events {
            if let Err(e) = self.send(event).await {
                warn!(error = %e, "Dropping domain event");
            }
        }
    }
}

/// Domain events emitted after a transaction commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SaleCreated(i64),
    SaleQuoted(i64),
    SaleDrafted(i64),
    SaleCopied {
        source_id: i64,
        copy_id: i64,
    },
    WbsCreated {
        wbs_id: i64,
        line_id: Option<i64>,
    },
    WbsReparented {
        wbs_id: i64,
        parent_id: Option<i64>,
    },
    WbsDeleted(i64),
}

/// Drains the event channel, logging every event until all senders are gone.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::SaleCreated(sale_id) => info!(sale_id, "sale created"),
            Event::SaleQuoted(sale_id) => info!(sale_id, "sale quoted"),
            Event::SaleDrafted(sale_id) => info!(sale_id, "sale reverted to draft"),
            Event::SaleCopied { source_id, copy_id } => {
                info!(source_id, copy_id, "sale copied")
            }
            Event::WbsCreated { wbs_id, line_id } => {
                info!(wbs_id, ?line_id, "work breakdown structure created")
            }
            Event::WbsReparented { wbs_id, parent_id } => {
                info!(wbs_id, ?parent_id, "work breakdown structure moved")
            }
            Event::WbsDeleted(wbs_id) => info!(wbs_id, "work breakdown structure deleted"),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_all_delivers_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        sender
            .send_all(vec![Event::SaleQuoted(1), Event::WbsDeleted(4)])
            .await;

        assert_eq!(rx.recv().await, Some(Event::SaleQuoted(1)));
        assert_eq!(rx.recv().await, Some(Event::WbsDeleted(4)));
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        assert!(sender.send(Event::SaleDrafted(2)).await.is_err());
    }

    #[tokio::test]
    async fn process_events_stops_when_senders_close() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Event::SaleCreated(9)).await.unwrap();
        drop(tx);
        process_events(rx).await;
    }
}
