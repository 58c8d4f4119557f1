mod campaign;
mod creative;
mod event;
mod targeting;

pub use campaign::{Campaign, CampaignStatus, UnknownStatus};
pub use creative::Creative;
pub use event::{Click, ClickCharge, Impression, NewClick, NewImpression, Stats, StatsQuery};
pub use targeting::{Targeting, UserContext};
