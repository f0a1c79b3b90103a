mod records;

pub use records::draw_records;
