//! # Record
//! Records are the basic unit the store hands us. A record is identified solely by its id: two records with the same id
//! and different fields are the same entity at two different points in time.

pub trait Record: Clone + 'static {
    fn id(&self) -> &str;
}
