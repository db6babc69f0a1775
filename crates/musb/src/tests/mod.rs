mod device;
mod mock;
