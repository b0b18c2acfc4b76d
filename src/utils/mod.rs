pub mod layout;

pub use layout::MediaLayout;
