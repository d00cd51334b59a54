//! Builtin native functions
//!
//! Bound as globals at engine startup. A native receives the heap and its
//! argument window and returns a value; an `Err` surfaces as a runtime
//! error in the calling program. `append` and `delete` shadow no keyword
//! but do collide with any user global of the same name.

use std::time::{SystemTime, UNIX_EPOCH};

use ember_core::{Heap, Value};

/// `clock()`: seconds since the epoch, as a number.
pub fn clock(_heap: &mut Heap, _args: &[Value]) -> Result<Value, String> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::number(seconds))
}

/// `append(list, item)`: push an item onto a list; returns nil.
pub fn append(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    if args.len() != 2 {
        return Err(format!("insufficient arguments, need 2 got={}", args.len()));
    }
    if !heap.is_list(args[0]) {
        return Err("cannot append item to non-list variable.".to_string());
    }
    let list = args[0].as_obj();
    heap.list_mut(list).items.push(args[1]);
    Ok(Value::nil())
}

/// `delete(list, index)`: remove the element at a bounds-checked index;
/// returns nil. Capacity is kept.
pub fn delete(heap: &mut Heap, args: &[Value]) -> Result<Value, String> {
    if args.len() != 2 {
        return Err(format!("insufficient arguments, need 2 got={}", args.len()));
    }
    if !heap.is_list(args[0]) {
        return Err("cannot append item to non-list variable.".to_string());
    }
    if !args[1].is_number() {
        return Err("index cannot be a non-number value.".to_string());
    }
    let list = args[0].as_obj();
    let index = args[1].as_number() as i64;
    let len = heap.list(list).items.len() as i64;
    if index < 0 || index >= len {
        return Err("index out of range.".to_string());
    }
    heap.list_mut(list).items.remove(index as usize);
    Ok(Value::nil())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_returns_number() {
        let mut heap = Heap::new();
        let value = clock(&mut heap, &[]).unwrap();
        assert!(value.is_number());
        assert!(value.as_number() > 0.0);
    }

    #[test]
    fn test_append() {
        let mut heap = Heap::new();
        let list = heap.new_list(vec![Value::number(1.0)]);
        let result = append(&mut heap, &[Value::object(list), Value::number(2.0)]).unwrap();
        assert!(result.is_nil());
        assert_eq!(heap.list(list).items.len(), 2);
    }

    #[test]
    fn test_append_non_list() {
        let mut heap = Heap::new();
        let err = append(&mut heap, &[Value::number(1.0), Value::number(2.0)]).unwrap_err();
        assert_eq!(err, "cannot append item to non-list variable.");
    }

    #[test]
    fn test_append_arity() {
        let mut heap = Heap::new();
        let err = append(&mut heap, &[Value::nil()]).unwrap_err();
        assert_eq!(err, "insufficient arguments, need 2 got=1");
    }

    #[test]
    fn test_delete() {
        let mut heap = Heap::new();
        let list =
            heap.new_list(vec![Value::number(1.0), Value::number(2.0), Value::number(3.0)]);
        delete(&mut heap, &[Value::object(list), Value::number(1.0)]).unwrap();
        assert_eq!(heap.list(list).items, vec![Value::number(1.0), Value::number(3.0)]);
    }

    #[test]
    fn test_delete_bounds() {
        let mut heap = Heap::new();
        let list = heap.new_list(vec![Value::number(1.0)]);
        let err = delete(&mut heap, &[Value::object(list), Value::number(5.0)]).unwrap_err();
        assert_eq!(err, "index out of range.");
        let err = delete(&mut heap, &[Value::object(list), Value::number(-1.0)]).unwrap_err();
        assert_eq!(err, "index out of range.");
    }

    #[test]
    fn test_delete_non_number_index() {
        let mut heap = Heap::new();
        let list = heap.new_list(vec![Value::number(1.0)]);
        let err = delete(&mut heap, &[Value::object(list), Value::nil()]).unwrap_err();
        assert_eq!(err, "index cannot be a non-number value.");
    }
}
