pub mod plan_birthday_sends_listener;
