//! Business services. The lifecycle service owns every order mutation;
//! the observer and totals modules are its collaborators.

pub mod order_lifecycle;
pub mod order_observer;
pub mod totals;
