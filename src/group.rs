//! Named submix groups: one volume node shared by member clips.

use std::sync::Arc;

use crate::backend::{AudioApi, SubmixId};
use crate::base::MAX_GROUP_NAME_LENGTH;

pub struct AudioGroup {
    name: String,
    submix: SubmixId,
    api: Arc<dyn AudioApi>,
}

impl AudioGroup {
    pub(crate) fn new(name: String, submix: SubmixId, api: Arc<dyn AudioApi>) -> Self {
        Self { name, submix, api }
    }

    pub(crate) fn submix(&self) -> SubmixId {
        self.submix
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Group volume multiplies every member clip's own volume.
    pub fn set_volume(&self, volume: f32) {
        self.api.group_volume(self.submix, Some(volume));
    }

    pub fn volume(&self) -> f32 {
        self.api.group_volume(self.submix, None)
    }
}

/// Truncates a group name to the table limit on a char boundary.
pub(crate) fn truncate_name(name: &str) -> String {
    let mut end = name.len().min(MAX_GROUP_NAME_LENGTH);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}
