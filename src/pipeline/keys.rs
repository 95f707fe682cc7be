use crate::delivery::Channel;

/// Redis key layout. Queue keys carry the schema version so a format change
/// can run next to old data; caches and markers do not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScheme {
    prefix: String,
    versioned: String,
}

impl KeyScheme {
    pub fn new(prefix: &str, schema_version: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            versioned: format!("{}{}", prefix, schema_version),
        }
    }

    pub fn processing_queue(&self) -> String {
        format!("{}:processing_queue", self.versioned)
    }

    pub fn processing_set(&self) -> String {
        format!("{}:processing_set", self.versioned)
    }

    pub fn reporting_queue(&self) -> String {
        format!("{}:reporting_queue", self.versioned)
    }

    pub fn delivery_queue(&self, channel: Channel) -> String {
        format!("{}:delivery_queue:{}", self.versioned, channel.as_str())
    }

    pub fn battle_state(&self, room: &str) -> String {
        format!("{}ongoing-data:{}", self.prefix, room)
    }

    pub fn last_battle_end(&self, room: &str) -> String {
        format!("{}last-finished-battle:{}", self.prefix, room)
    }

    pub fn latest_tick(&self) -> String {
        format!("{}last-checked-tick", self.prefix)
    }

    pub fn username(&self, user_id: &str) -> String {
        format!("{}cache:username:{}", self.prefix, user_id)
    }

    pub fn alliance(&self, username: &str) -> String {
        format!("{}cache:alliance:{}", self.prefix, username)
    }

    pub fn alliances_fetched(&self) -> String {
        format!("{}fetched-alliance-cache", self.prefix)
    }
}
