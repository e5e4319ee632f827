mod activation;
mod catalog;
mod proposal;
