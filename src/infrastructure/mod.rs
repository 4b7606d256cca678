//! Everything that touches the outside world: the bus transport, the
//! control-plane router, broker adapters, and the ambient observability
//! surface.

pub mod bus;
pub mod health;
pub mod observability;
pub mod router;
pub mod trader;
