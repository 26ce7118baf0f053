//! Backend adapters

mod mongodb;
mod mysql;
mod postgres;
mod redis;

pub use self::mongodb::MongoScanner;
pub use self::mysql::MySqlScanner;
pub use self::postgres::PostgresScanner;
pub use self::redis::RedisScanner;
