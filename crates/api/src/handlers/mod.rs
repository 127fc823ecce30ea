pub mod books;
pub mod recognitions;
pub mod tasks;
pub mod uploads;
