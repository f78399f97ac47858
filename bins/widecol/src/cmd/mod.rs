pub mod browse;
