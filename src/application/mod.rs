//! The five pipeline agents: Order Service, Risk Service, Execution Agent,
//! and Portfolio Service, plus their shared configuration types. The
//! Central Router lives in `infrastructure` since it is a control-plane
//! concern shared by every agent rather than a pipeline stage itself.

pub mod execution_agent;
pub mod order_service;
pub mod portfolio_service;
pub mod risk_service;
