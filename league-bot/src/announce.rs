// Announcement dispatcher: routes result embeds to the fixed output channels.

use std::collections::HashSet;

use tracing::debug;

use crate::config::ChannelConfig;
use crate::protocol::{ChannelId, Embed, GatewayAction, OutgoingMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Fine and bail notices.
    Fines,
    /// Signings and releases.
    Announcements,
}

/// Posts embeds to the configured channels. Posting is best-effort: a channel
/// the platform did not report as reachable is skipped without error.
#[derive(Debug, Clone)]
pub struct Announcer {
    channels: ChannelConfig,
    resolvable: HashSet<ChannelId>,
}

impl Announcer {
    pub fn new(channels: ChannelConfig) -> Self {
        Announcer {
            channels,
            resolvable: HashSet::new(),
        }
    }

    /// Replace the set of channels the bot can currently post to.
    pub fn set_resolvable(&mut self, channels: impl IntoIterator<Item = ChannelId>) {
        self.resolvable = channels.into_iter().collect();
    }

    pub fn channel_for(&self, destination: Destination) -> ChannelId {
        match destination {
            Destination::Fines => self.channels.fines,
            Destination::Announcements => self.channels.announcements,
        }
    }

    /// Build the post for `destination`, or `None` if its channel cannot be
    /// resolved.
    pub fn announce(&self, destination: Destination, embed: Embed) -> Option<GatewayAction> {
        let channel_id = self.channel_for(destination);
        if !self.resolvable.contains(&channel_id) {
            debug!(
                "Skipping {:?} announcement: channel {} not resolvable",
                destination, channel_id
            );
            return None;
        }
        Some(GatewayAction::SendMessage {
            channel_id,
            message: OutgoingMessage::embed(embed),
        })
    }
}
