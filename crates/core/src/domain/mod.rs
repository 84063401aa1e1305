pub mod decision;
pub mod entity;
pub mod history;
pub mod inference;
pub mod intent;
pub mod result;
pub mod sentiment;
