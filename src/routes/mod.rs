/// Router Module Index
///
/// Routes are split by access level. The admin module is wrapped by the token
/// and role gate in `create_router`; handlers then apply their own requirement.

/// Unauthenticated routes: the admin login.
pub mod public;

/// Routes restricted to administrative roles.
pub mod admin;
