pub mod buttons;
pub mod embeds;
pub mod notifier;

pub use notifier::SerenityNotifier;
