use tch::nn;

/// Which part of the model a parameter belongs to.
///
/// The tag is fixed when the component is constructed: every component lives
/// under its own top-level var-store path and optimizer group, so a
/// parameter's learning rate never depends on how its name happens to be
/// spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentTag {
    Base,
    Backbone,
    Encoder,
    Necks,
    Heads,
}

impl ComponentTag {
    pub const COMPONENTS: [ComponentTag; 4] = [
        ComponentTag::Backbone,
        ComponentTag::Encoder,
        ComponentTag::Necks,
        ComponentTag::Heads,
    ];

    /// Var-store path segment, also the key under `OPTIMIZER.LR`.
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentTag::Base => "base",
            ComponentTag::Backbone => "backbone",
            ComponentTag::Encoder => "encoder",
            ComponentTag::Necks => "necks",
            ComponentTag::Heads => "heads",
        }
    }

    /// Optimizer group id. Untagged variables land in tch's default group 0,
    /// which is why `Base` owns it.
    pub fn group(self) -> usize {
        match self {
            ComponentTag::Base => 0,
            ComponentTag::Backbone => 1,
            ComponentTag::Encoder => 2,
            ComponentTag::Necks => 3,
            ComponentTag::Heads => 4,
        }
    }

    /// Tag of a qualified parameter name such as `backbone.layer1.0.conv1.weight`.
    /// Only the first path segment counts.
    pub fn of_parameter(name: &str) -> ComponentTag {
        let head = name.split('.').next().unwrap_or_default();
        Self::COMPONENTS
            .into_iter()
            .find(|tag| tag.as_str() == head)
            .unwrap_or(ComponentTag::Base)
    }

    /// Sub-path for a component, carrying its optimizer group.
    pub fn path<'a>(self, root: &nn::Path<'a>) -> nn::Path<'a> {
        root.set_group(self.group()).sub(self.as_str())
    }
}

impl std::fmt::Display for ComponentTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
