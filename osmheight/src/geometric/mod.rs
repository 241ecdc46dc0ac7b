pub mod building;
pub mod height;
pub mod study_area;
