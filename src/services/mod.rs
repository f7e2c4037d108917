//! Services layer - Business logic
//!
//! Services are responsible for:
//! - Implementing business rules and input validation
//! - Coordinating between repositories and cache
//! - Reporting failures through one error enum per service

pub mod audit;
pub mod category;
pub mod password;
pub mod post;
pub mod product;
pub mod rate_limiter;
pub mod tag;
pub mod token;
pub mod user;
pub mod validation;

pub use audit::{AuditService, AuditServiceError, ClientInfo};
pub use category::{CategoryService, CategoryServiceError, CreateCategoryData};
pub use password::{hash_password, verify_password};
pub use post::{CreatePostData, PostService, PostServiceError, UpdatePostData};
pub use product::{ProductService, ProductServiceError};
pub use rate_limiter::{LoginRateLimiter, RequestRateLimiter};
pub use tag::{TagService, TagServiceError};
pub use token::{Claims, TokenError, TokenService};
pub use user::{
    LoginInput, LoginOutcome, RegisterInput, UpdateProfileInput, UserService, UserServiceError,
};
