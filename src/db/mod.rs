pub mod attendance_repository;
pub mod mock_db;
pub mod postgres_attendance_repository;
pub mod postgres_session_repository;
pub mod postgres_subscription_repository;
pub mod session_repository;
pub mod subscription_repository;
